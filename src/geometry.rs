use crate::types::LatLng;
use geo::algorithm::bounding_rect::BoundingRect;
use geo::{ChamberlainDuquetteArea, Coord, LineString, Polygon, Rect};
use thiserror::Error;

pub const SQUARE_METERS_PER_HECTARE: f64 = 10_000.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    #[error("a plot boundary needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),
}

/// Normalize a drawn or stored boundary into an open ring.
///
/// The drawing layer hands over the vertex list with the first vertex
/// appended again to close the ring; stored records keep the open form. Both
/// are accepted: a trailing duplicate of the first vertex is dropped, then
/// the ring must still have at least 3 vertices.
pub fn normalize_ring(vertices: &[LatLng]) -> Result<Vec<LatLng>, RingError> {
    let mut ring = vertices.to_vec();
    if ring.len() >= 2 && ring.first() == ring.last() {
        ring.pop();
    }
    if ring.len() < 3 {
        return Err(RingError::TooFewVertices(ring.len()));
    }
    Ok(ring)
}

fn to_polygon(ring: &[LatLng]) -> Polygon<f64> {
    // geo closes the exterior ring implicitly, matching the map layer's
    // convention for the stored open form.
    let exterior: LineString<f64> = ring
        .iter()
        .map(|v| Coord { x: v.lng, y: v.lat })
        .collect();
    Polygon::new(exterior, vec![])
}

/// Spherical surface area in square meters of a normalized ring.
///
/// The numeric method is the `geo` crate's Chamberlain–Duquette
/// implementation, the same spherical algorithm turf.js reports for drawn
/// rings. Treated as an external contract, not reimplemented.
pub fn area_square_meters(ring: &[LatLng]) -> f64 {
    to_polygon(ring).chamberlain_duquette_unsigned_area()
}

/// Hectares rounded to 2 decimal places, the precision stored at capture.
pub fn area_hectares(ring: &[LatLng]) -> f64 {
    round2(area_square_meters(ring) / SQUARE_METERS_PER_HECTARE)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Bounding-box center used to place the preview camera.
///
/// This is `((min lat + max lat)/2, (min lng + max lng)/2)`, not a geometric
/// centroid: for a sufficiently irregular boundary the point can sit outside
/// the polygon.
pub fn bounding_box_center(ring: &[LatLng]) -> LatLng {
    let line: LineString<f64> = ring
        .iter()
        .map(|v| Coord { x: v.lng, y: v.lat })
        .collect();
    let rect = line.bounding_rect().unwrap_or(Rect::new(
        Coord { x: 0.0, y: 0.0 },
        Coord { x: 0.0, y: 0.0 },
    ));
    LatLng {
        lat: (rect.min().y + rect.max().y) / 2.0,
        lng: (rect.min().x + rect.max().x) / 2.0,
    }
}
