use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Plot;

/// Bump when the on-disk layout changes shape. Version 1 wraps the plot
/// array in an envelope; bare-array files predate the version field.
pub const STORE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store parse: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store schema version {0} is newer than this build understands")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreEnvelope {
    version: u32,
    plots: Vec<Plot>,
}

/// What `open` found on disk. A corrupt or too-new file never aborts
/// startup; the caller decides how loudly to report it.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(usize),
    Absent,
    Failed(StoreError),
}

/// All plot records, mirrored between memory and one JSON file.
///
/// Writes go to disk first and only then into the in-memory list, so a full
/// disk or a permissions problem leaves memory agreeing with the last file
/// that actually exists.
pub struct PlotStore {
    path: PathBuf,
    plots: Vec<Plot>,
}

impl PlotStore {
    pub fn open<P: AsRef<Path>>(path: P) -> (Self, LoadOutcome) {
        let path = path.as_ref().to_path_buf();
        let (plots, outcome) = match fs::read_to_string(&path) {
            Ok(raw) => match parse_store(&raw) {
                Ok(plots) => {
                    let n = plots.len();
                    (plots, LoadOutcome::Loaded(n))
                }
                Err(err) => (Vec::new(), LoadOutcome::Failed(err)),
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                (Vec::new(), LoadOutcome::Absent)
            }
            Err(err) => (Vec::new(), LoadOutcome::Failed(err.into())),
        };
        (Self { path, plots }, outcome)
    }

    pub fn plots(&self) -> &[Plot] {
        &self.plots
    }

    pub fn get(&self, id: u64) -> Option<&Plot> {
        self.plots.iter().find(|p| p.id == id)
    }

    /// Persist the list with `plot` appended, then adopt it in memory.
    pub fn append(&mut self, plot: Plot) -> Result<(), StoreError> {
        let mut next = self.plots.clone();
        next.push(plot);
        self.persist(&next)?;
        self.plots = next;
        Ok(())
    }

    /// Remove every record with `id`. Returns whether anything matched;
    /// nothing is rewritten when the id is unknown.
    pub fn remove(&mut self, id: u64) -> Result<bool, StoreError> {
        let next: Vec<Plot> = self.plots.iter().filter(|p| p.id != id).cloned().collect();
        if next.len() == self.plots.len() {
            return Ok(false);
        }
        self.persist(&next)?;
        self.plots = next;
        Ok(true)
    }

    fn persist(&self, plots: &[Plot]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let envelope = StoreEnvelope {
            version: STORE_SCHEMA_VERSION,
            plots: plots.to_vec(),
        };
        let raw = serde_json::to_vec_pretty(&envelope)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

fn parse_store(raw: &str) -> Result<Vec<Plot>, StoreError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    // A bare top-level array is the pre-envelope layout; it still loads and
    // gets rewritten as an envelope on the next mutation.
    if value.is_array() {
        return Ok(serde_json::from_value(value)?);
    }
    let envelope: StoreEnvelope = serde_json::from_value(value)?;
    if envelope.version > STORE_SCHEMA_VERSION {
        return Err(StoreError::UnsupportedVersion(envelope.version));
    }
    Ok(envelope.plots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LatLng;

    fn sample_plot(id: u64, name: &str) -> Plot {
        Plot {
            id,
            name: name.to_string(),
            crop: "Soja".to_string(),
            area: 12.5,
            notes: None,
            coordinates: vec![
                LatLng { lat: 0.0, lng: 0.0 },
                LatLng { lat: 0.0, lng: 0.001 },
                LatLng {
                    lat: 0.001,
                    lng: 0.001,
                },
            ],
        }
    }

    #[test]
    fn round_trips_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talhoes.json");

        let (mut store, _) = PlotStore::open(&path);
        store.append(sample_plot(1, "Fundo")).unwrap();
        store.append(sample_plot(2, "Encosta")).unwrap();

        let (reopened, outcome) = PlotStore::open(&path);
        assert!(matches!(outcome, LoadOutcome::Loaded(2)));
        assert_eq!(reopened.plots().len(), 2);
        assert_eq!(reopened.plots()[0].name, "Fundo");
        assert_eq!(reopened.plots()[1].name, "Encosta");
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (store, outcome) = PlotStore::open(dir.path().join("talhoes.json"));
        assert!(matches!(outcome, LoadOutcome::Absent));
        assert!(store.plots().is_empty());
    }

    #[test]
    fn append_creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("talhoes.json");

        let (mut store, outcome) = PlotStore::open(&path);
        assert!(matches!(outcome, LoadOutcome::Absent));
        store.append(sample_plot(1, "Fundo")).unwrap();

        let (reopened, outcome) = PlotStore::open(&path);
        assert!(matches!(outcome, LoadOutcome::Loaded(1)));
        assert_eq!(reopened.plots()[0].name, "Fundo");
    }

    #[test]
    fn malformed_file_reports_failure_but_still_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talhoes.json");
        fs::write(&path, "{not json").unwrap();

        let (store, outcome) = PlotStore::open(&path);
        assert!(matches!(outcome, LoadOutcome::Failed(StoreError::Serde(_))));
        assert!(store.plots().is_empty());
    }

    #[test]
    fn legacy_bare_array_loads_and_upgrades_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talhoes.json");
        let legacy = serde_json::to_string(&vec![sample_plot(7, "Antigo")]).unwrap();
        fs::write(&path, legacy).unwrap();

        let (mut store, outcome) = PlotStore::open(&path);
        assert!(matches!(outcome, LoadOutcome::Loaded(1)));
        assert_eq!(store.plots()[0].name, "Antigo");

        store.append(sample_plot(8, "Novo")).unwrap();
        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("\"version\""));

        let (reopened, outcome) = PlotStore::open(&path);
        assert!(matches!(outcome, LoadOutcome::Loaded(2)));
        assert_eq!(reopened.plots()[1].name, "Novo");
    }

    #[test]
    fn remove_keeps_the_order_of_survivors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talhoes.json");

        let (mut store, _) = PlotStore::open(&path);
        store.append(sample_plot(1, "A")).unwrap();
        store.append(sample_plot(2, "B")).unwrap();
        store.append(sample_plot(3, "C")).unwrap();

        assert!(store.remove(2).unwrap());
        let names: Vec<&str> = store.plots().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["A", "C"]);

        let (reopened, _) = PlotStore::open(&path);
        let names: Vec<&str> = reopened.plots().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["A", "C"]);
    }

    #[test]
    fn remove_unknown_id_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talhoes.json");

        let (mut store, _) = PlotStore::open(&path);
        store.append(sample_plot(1, "A")).unwrap();
        assert!(!store.remove(99).unwrap());
        assert_eq!(store.plots().len(), 1);
    }

    #[test]
    fn newer_schema_version_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talhoes.json");
        fs::write(&path, r#"{"version": 2, "plots": []}"#).unwrap();

        let (store, outcome) = PlotStore::open(&path);
        assert!(matches!(
            outcome,
            LoadOutcome::Failed(StoreError::UnsupportedVersion(2))
        ));
        assert!(store.plots().is_empty());
    }
}
