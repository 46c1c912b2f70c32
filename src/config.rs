use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub map: MapConfig,
    pub tiles: TileConfig,
    pub preview: PreviewConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8642 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file holding the plot records.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("talhoes.json") }
    }
}

/// Initial camera for the live map served to the browser.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MapConfig {
    pub center_lat: f64,
    pub center_lng: f64,
    pub zoom: u8,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self { center_lat: -15.78, center_lng: -47.93, zoom: 5 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TileConfig {
    /// XYZ template with `{z}`/`{x}`/`{y}` placeholders, shared by the live
    /// map and the preview renderer.
    pub url_template: String,
    /// Bound on each tile fetch during preview rendering.
    pub fetch_timeout_ms: u64,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            url_template: "https://tiles.stadiamaps.com/tiles/alidade_smooth_dark/{z}/{x}/{y}.png"
                .to_string(),
            fetch_timeout_ms: 4000,
        }
    }
}

/// Geometry of the off-screen per-plot preview maps used for the report.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PreviewConfig {
    pub width: u32,
    pub height: u32,
    pub zoom: u8,
    pub background: String, // Hex code
    pub outline: String,    // Hex code
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            width: 600,
            height: 400,
            zoom: 17,
            background: "#1a1a1a".to_string(),
            outline: "#0000ff".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_original_tool() {
        let config = AppConfig::default();
        assert_eq!(config.preview.width, 600);
        assert_eq!(config.preview.height, 400);
        assert_eq!(config.preview.zoom, 17);
        assert_eq!(config.preview.background, "#1a1a1a");
        assert_eq!(config.map.zoom, 5);
        assert!(config.tiles.url_template.contains("{z}"));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: AppConfig = toml::from_str("[server]\nport = 9000\n").unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.storage.path, PathBuf::from("talhoes.json"));
        assert_eq!(config.tiles.fetch_timeout_ms, 4000);
    }
}
