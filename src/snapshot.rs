use std::f64::consts::PI;
use std::future::Future;
use std::io::Cursor;
use std::pin::Pin;
use std::time::Duration;

use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_line_segment_mut;
use thiserror::Error;

use crate::config::{PreviewConfig, TileConfig};
use crate::geometry::{self, RingError};
use crate::types::{LatLng, Plot};

// Constants for Web Mercator
const TILE_SIZE: u32 = 256;

#[derive(Debug, Error)]
pub enum TileError {
    #[error("tile request failed: {0}")]
    Request(String),
    #[error("tile server responded with status {0}")]
    Status(u16),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    BadRing(#[from] RingError),
    #[error("failed to encode preview: {0}")]
    Encode(#[from] image::ImageError),
}

/// Source of basemap tiles, keyed by slippy-map z/x/y.
///
/// Kept object-safe so handlers can hold one behind `dyn` and tests can swap
/// in canned fetchers.
pub trait TileFetcher: Send + Sync {
    fn fetch(
        &self,
        z: u8,
        x: u32,
        y: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, TileError>> + Send + '_>>;
}

/// Fetches tiles over HTTP from a `{z}/{x}/{y}` URL template.
pub struct HttpTileFetcher {
    client: reqwest::Client,
    template: String,
}

impl HttpTileFetcher {
    pub fn new(template: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            template: template.to_string(),
        }
    }

    fn url_for(&self, z: u8, x: u32, y: u32) -> String {
        self.template
            .replace("{z}", &z.to_string())
            .replace("{x}", &x.to_string())
            .replace("{y}", &y.to_string())
    }
}

impl TileFetcher for HttpTileFetcher {
    fn fetch(
        &self,
        z: u8,
        x: u32,
        y: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, TileError>> + Send + '_>> {
        let url = self.url_for(z, x, y);
        Box::pin(async move {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|err| TileError::Request(err.to_string()))?;
            if !response.status().is_success() {
                return Err(TileError::Status(response.status().as_u16()));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|err| TileError::Request(err.to_string()))?;
            Ok(bytes.to_vec())
        })
    }
}

/// A rendered plot preview plus how much of its basemap actually arrived.
///
/// `tiles_total` counts fetch attempts; rows outside the Mercator world are
/// skipped and never attempted.
pub struct Preview {
    pub image: RgbaImage,
    pub tiles_total: usize,
    pub tiles_failed: usize,
}

impl Preview {
    pub fn encode_png(&self) -> Result<Vec<u8>, SnapshotError> {
        let mut png = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
        Ok(png)
    }
}

/// Render one plot over its basemap.
///
/// The canvas starts as the configured background color; every tile that
/// fails, times out, or refuses to decode just leaves its square of
/// background showing, and the boundary outline is drawn regardless. A dead
/// tile server therefore degrades the picture, never the request.
pub async fn render(
    plot: &Plot,
    preview: &PreviewConfig,
    tiles: &TileConfig,
    fetcher: &dyn TileFetcher,
) -> Result<Preview, SnapshotError> {
    let ring = geometry::normalize_ring(&plot.coordinates)?;
    let center = geometry::bounding_box_center(&ring);
    let viewport = Viewport::centered(center, preview.zoom, preview.width, preview.height);

    let mut canvas = RgbaImage::from_pixel(preview.width, preview.height, parse_hex(&preview.background));

    let deadline = Duration::from_millis(tiles.fetch_timeout_ms);
    let n = 1_i64 << viewport.zoom;
    let (tx_range, ty_range) = viewport.tile_range();
    let mut tiles_total = 0;
    let mut tiles_failed = 0;
    for ty in ty_range {
        // Rows beyond the poles have no tiles.
        if ty < 0 || ty >= n {
            continue;
        }
        for tx in tx_range.clone() {
            // Columns wrap around the antimeridian.
            let wrapped_x = tx.rem_euclid(n) as u32;
            tiles_total += 1;
            let fetched =
                tokio::time::timeout(deadline, fetcher.fetch(viewport.zoom, wrapped_x, ty as u32))
                    .await;
            let bytes = match fetched {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(_)) | Err(_) => {
                    tiles_failed += 1;
                    continue;
                }
            };
            let tile = match image::load_from_memory(&bytes) {
                Ok(decoded) => decoded.to_rgba8(),
                Err(_) => {
                    tiles_failed += 1;
                    continue;
                }
            };
            let off_x = (tx * TILE_SIZE as i64) as f64 - viewport.origin_x;
            let off_y = (ty * TILE_SIZE as i64) as f64 - viewport.origin_y;
            image::imageops::overlay(&mut canvas, &tile, off_x.round() as i64, off_y.round() as i64);
        }
    }

    draw_outline(&mut canvas, &ring, &viewport, parse_hex(&preview.outline));

    Ok(Preview {
        image: canvas,
        tiles_total,
        tiles_failed,
    })
}

fn draw_outline(canvas: &mut RgbaImage, ring: &[LatLng], viewport: &Viewport, color: Rgba<u8>) {
    for i in 0..ring.len() {
        let from = viewport.to_canvas(&ring[i]);
        let to = viewport.to_canvas(&ring[(i + 1) % ring.len()]);
        // A second pass offset by one pixel thickens the 1px Bresenham line.
        for (dx, dy) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)] {
            draw_line_segment_mut(
                canvas,
                (from.0 + dx, from.1 + dy),
                (to.0 + dx, to.1 + dy),
                color,
            );
        }
    }
}

/// A window into the global Mercator pixel plane at one zoom level.
struct Viewport {
    origin_x: f64,
    origin_y: f64,
    width: u32,
    height: u32,
    zoom: u8,
}

impl Viewport {
    fn centered(center: LatLng, zoom: u8, width: u32, height: u32) -> Self {
        let zoom = zoom.min(22);
        let (cx, cy) = global_pixel(center.lat, center.lng, zoom);
        Self {
            origin_x: cx - width as f64 / 2.0,
            origin_y: cy - height as f64 / 2.0,
            width,
            height,
            zoom,
        }
    }

    fn tile_range(
        &self,
    ) -> (
        std::ops::RangeInclusive<i64>,
        std::ops::RangeInclusive<i64>,
    ) {
        let tile = TILE_SIZE as f64;
        let tx_min = (self.origin_x / tile).floor() as i64;
        let tx_max = ((self.origin_x + self.width as f64 - 1.0) / tile).floor() as i64;
        let ty_min = (self.origin_y / tile).floor() as i64;
        let ty_max = ((self.origin_y + self.height as f64 - 1.0) / tile).floor() as i64;
        (tx_min..=tx_max, ty_min..=ty_max)
    }

    fn to_canvas(&self, vertex: &LatLng) -> (f32, f32) {
        let (gx, gy) = global_pixel(vertex.lat, vertex.lng, self.zoom);
        ((gx - self.origin_x) as f32, (gy - self.origin_y) as f32)
    }
}

// Coordinate conversions
fn global_pixel(lat: f64, lng: f64, zoom: u8) -> (f64, f64) {
    let n = 2.0_f64.powi(zoom as i32);
    let x_t = (lng + 180.0) / 360.0 * n;
    let lat_rad = lat.to_radians();
    let y_t = (1.0 - (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() / PI) / 2.0 * n;
    (x_t * TILE_SIZE as f64, y_t * TILE_SIZE as f64)
}

fn parse_hex(hex: &str) -> Rgba<u8> {
    let hex = hex.trim_start_matches('#');
    let r = u8::from_str_radix(hex.get(0..2).unwrap_or(""), 16).unwrap_or(0);
    let g = u8::from_str_radix(hex.get(2..4).unwrap_or(""), 16).unwrap_or(0);
    let b = u8::from_str_radix(hex.get(4..6).unwrap_or(""), 16).unwrap_or(0);
    Rgba([r, g, b, 255])
}
