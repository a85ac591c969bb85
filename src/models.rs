//! Model artifacts consumed and produced around the conditioning pipeline.
//!
//! Trainers are interchangeable: the pipeline only hands them the hourly
//! table and finds their output again by file name. Artifacts follow
//! `model_{line}.*`, `model_speed_{line}.*` and `model_coords_{line}.*`.
//! The built-in [`HourlySpeedModel`] is a baseline stored as JSON.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analyzers::types::HourlyAggregate;
use crate::error::{PipelineError, Result};
use crate::output::file_safe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Legacy single model per line, predicting speed.
    Line,
    Speed,
    Coords,
}

impl ModelKind {
    fn prefix(self) -> &'static str {
        match self {
            ModelKind::Line => "model_",
            ModelKind::Speed => "model_speed_",
            ModelKind::Coords => "model_coords_",
        }
    }

    fn label(self) -> &'static str {
        match self {
            ModelKind::Line => "line",
            ModelKind::Speed => "speed",
            ModelKind::Coords => "coordinates",
        }
    }

    /// File stem for a line, e.g. `model_speed_107`.
    pub fn stem(self, line_id: &str) -> String {
        format!("{}{}", self.prefix(), file_safe(line_id))
    }
}

/// Anything that predicts a line's speed from the hour of day.
pub trait SpeedModel {
    fn predict_speed(&self, hour_of_day: u8) -> Option<f64>;
}

/// Mean reported speed per hour of day, with the line's overall mean for
/// hours that had no training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlySpeedModel {
    pub line_id: String,
    pub hourly: BTreeMap<u8, f64>,
    pub fallback: f64,
    pub trained_at: DateTime<Utc>,
}

impl HourlySpeedModel {
    /// Fits the profile from the rows of one line. Returns `None` when there
    /// are no rows for the line.
    pub fn fit(line_id: &str, rows: &[HourlyAggregate]) -> Option<Self> {
        let rows: Vec<&HourlyAggregate> = rows.iter().filter(|r| r.line_id == line_id).collect();
        let total: usize = rows.iter().map(|r| r.observations).sum();
        if total == 0 {
            return None;
        }

        let weighted: f64 = rows
            .iter()
            .map(|r| r.mean_speed * r.observations as f64)
            .sum();

        Some(HourlySpeedModel {
            line_id: line_id.to_string(),
            hourly: rows.iter().map(|r| (r.hour_of_day, r.mean_speed)).collect(),
            fallback: weighted / total as f64,
            trained_at: Utc::now(),
        })
    }
}

impl SpeedModel for HourlySpeedModel {
    fn predict_speed(&self, hour_of_day: u8) -> Option<f64> {
        Some(self.hourly.get(&hour_of_day).copied().unwrap_or(self.fallback))
    }
}

/// A directory of model artifacts.
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Finds the artifact for `line_id`, whatever its extension.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ModelNotFound`] when no file matches.
    pub fn locate(&self, line_id: &str, kind: ModelKind) -> Result<PathBuf> {
        let stem = kind.stem(line_id);
        let mut matches: Vec<PathBuf> = match fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .and_then(|n| n.split_once('.'))
                        .is_some_and(|(s, _)| s == stem)
                })
                .collect(),
            Err(_) => Vec::new(),
        };

        // prefer the JSON artifact when several formats exist
        matches.sort_by_key(|p| {
            let is_json = p.extension().and_then(|e| e.to_str()) == Some("json");
            (!is_json, p.clone())
        });
        matches
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::ModelNotFound {
                line_id: line_id.to_string(),
                kind: kind.label().to_string(),
            })
    }

    pub fn save_speed_model(&self, model: &HourlySpeedModel) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(format!("{}.json", ModelKind::Speed.stem(&model.line_id)));
        fs::write(&path, serde_json::to_vec_pretty(model)?)?;
        Ok(path)
    }

    /// Loads the speed model of a line, falling back to the legacy
    /// per-line artifact name.
    pub fn load_speed_model(&self, line_id: &str) -> Result<HourlySpeedModel> {
        let path = self
            .locate(line_id, ModelKind::Speed)
            .or_else(|_| self.locate(line_id, ModelKind::Line))?;
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Fits and saves one [`HourlySpeedModel`] per line present in `rows`.
pub fn train_speed_models(rows: &[HourlyAggregate], store: &ModelStore) -> Result<usize> {
    let mut lines: Vec<&str> = rows.iter().map(|r| r.line_id.as_str()).collect();
    lines.sort_unstable();
    lines.dedup();

    let mut saved = 0;
    for line_id in lines {
        match HourlySpeedModel::fit(line_id, rows) {
            Some(model) => {
                let path = store.save_speed_model(&model)?;
                info!(line_id, path = %path.display(), hours = model.hourly.len(), "Model saved");
                saved += 1;
            }
            None => warn!(line_id, "No observations, model not trained"),
        }
    }
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn row(line: &str, hour: u8, observations: usize, mean_speed: f64) -> HourlyAggregate {
        HourlyAggregate {
            line_id: line.into(),
            hour_of_day: hour,
            observations,
            mean_speed,
            mean_real_velocity_kmh: None,
            mean_latitude: None,
            mean_longitude: None,
        }
    }

    fn temp_store(name: &str) -> ModelStore {
        let dir = env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        ModelStore::new(dir)
    }

    #[test]
    fn test_fit_and_predict() {
        let rows = vec![row("107", 8, 2, 15.0), row("107", 14, 1, 30.0), row("3", 8, 5, 1.0)];
        let model = HourlySpeedModel::fit("107", &rows).unwrap();

        assert_eq!(model.predict_speed(8), Some(15.0));
        assert_eq!(model.predict_speed(14), Some(30.0));
        assert_eq!(model.predict_speed(3), Some(20.0));
        assert!(HourlySpeedModel::fit("999", &rows).is_none());
    }

    #[test]
    fn test_locate_by_naming_convention() {
        let store = temp_store("busline_conditioner_models_locate");
        fs::write(store.dir().join("model_107.joblib"), b"x").unwrap();
        fs::write(store.dir().join("model_speed_3.joblib"), b"x").unwrap();
        fs::write(store.dir().join("model_speed_3.json"), b"{}").unwrap();

        assert!(store.locate("107", ModelKind::Line).is_ok());
        assert!(store.locate("10", ModelKind::Line).is_err());
        let speed = store.locate("3", ModelKind::Speed).unwrap();
        assert_eq!(speed.extension().unwrap(), "json");

        let err = store.locate("107", ModelKind::Coords).unwrap_err();
        assert!(matches!(err, PipelineError::ModelNotFound { .. }));

        fs::remove_dir_all(store.dir()).unwrap();
    }

    #[test]
    fn test_train_then_load() {
        let store = temp_store("busline_conditioner_models_train");
        let rows = vec![row("107", 8, 2, 15.0), row("232", 9, 1, 22.0)];

        assert_eq!(train_speed_models(&rows, &store).unwrap(), 2);
        let model = store.load_speed_model("232").unwrap();
        assert_eq!(model.predict_speed(9), Some(22.0));

        assert!(matches!(
            store.load_speed_model("415"),
            Err(PipelineError::ModelNotFound { .. })
        ));

        fs::remove_dir_all(store.dir()).unwrap();
    }
}
