use serde::{Deserialize, Serialize};

/// One boundary vertex, serialized as the `{lat, lng}` objects the map layer
/// produces and the store persists.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// A mapped field plot ("talhão") as persisted and served.
///
/// `coordinates` is the open boundary ring; the first vertex implicitly
/// closes it. `id` is the capture timestamp in Unix milliseconds, so two
/// plots captured within the same millisecond collide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plot {
    pub id: u64,
    pub name: String,
    pub crop: String,
    /// Hectares, rounded to 2 decimal places at capture time.
    pub area: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub coordinates: Vec<LatLng>,
}

/// What the capture form submits: everything except the server-assigned id
/// and the computed area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotDraft {
    pub name: String,
    pub crop: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub coordinates: Vec<LatLng>,
}
