use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::filter::MonitoredLines;

/// Lines monitored when no config names any.
const DEFAULT_LINES: &[&str] = &[
    "107", "177", "203", "222", "230", "232", "415", "2803", "324", "852", "557", "759", "343",
    "779", "905", "108", "483", "864", "639", "3", "309", "774", "629", "371", "397", "100",
    "838", "315", "624", "388", "918", "665", "328", "497", "878", "355", "138", "606", "457",
    "550", "803", "917", "638", "2336", "399", "298", "867", "553", "565", "422", "756",
    "186012003", "292", "554", "634",
];

/// How points are matched back to the canonical route after clustering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMatch {
    /// Keep every ping whose raw coordinate pair appears in the cluster.
    #[default]
    Coordinates,
    /// Keep exactly the pings the clustering labelled.
    RecordId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Neighbourhood radius, in coordinate degrees.
    pub eps: f64,
    pub min_samples: usize,
    pub route_match: RouteMatch,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            eps: 0.001,
            min_samples: 5,
            route_match: RouteMatch::Coordinates,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolidayRegion {
    #[default]
    Brazil,
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HolidayConfig {
    pub region: HolidayRegion,
    /// Additional dates treated as holidays (municipal, state, ad hoc).
    pub extra_dates: Vec<NaiveDate>,
}

/// Pipeline settings.
///
/// Stored as JSON on disk; every field is optional:
/// ```json
/// {
///   "monitored_lines": ["107", "232"],
///   "clustering": { "eps": 0.001, "min_samples": 5, "route_match": "coordinates" },
///   "holidays": { "region": "brazil", "extra_dates": ["2024-01-20"] },
///   "concurrency": 4
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub monitored_lines: MonitoredLines,
    pub clustering: ClusteringConfig,
    pub holidays: HolidayConfig,
    /// Maximum number of files or lines processed at once.
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            monitored_lines: MonitoredLines::new(DEFAULT_LINES.iter().copied()),
            clustering: ClusteringConfig::default(),
            holidays: HolidayConfig::default(),
            concurrency: 4,
        }
    }
}

impl PipelineConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        info!(
            path = %path.display(),
            lines = config.monitored_lines.len(),
            "Loaded pipeline config"
        );
        Ok(config)
    }

    /// Loads from `path` if given, else from `PIPELINE_CONFIG`, else defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match std::env::var("PIPELINE_CONFIG") {
            Ok(env_path) => Self::load(Path::new(&env_path)),
            Err(_) => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.monitored_lines.len(), 55);
        assert!(config.monitored_lines.contains("186012003"));
        assert_eq!(config.clustering.eps, 0.001);
        assert_eq!(config.clustering.min_samples, 5);
        assert_eq!(config.holidays.region, HolidayRegion::Brazil);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"monitored_lines":["3","3","107"],"clustering":{"min_samples":2,"route_match":"record_id"}}"#,
        )
        .unwrap();

        assert_eq!(config.monitored_lines.len(), 2);
        assert_eq!(config.clustering.min_samples, 2);
        assert_eq!(config.clustering.eps, 0.001);
        assert_eq!(config.clustering.route_match, RouteMatch::RecordId);
        assert_eq!(config.concurrency, 4);
    }

    #[test]
    fn test_extra_holiday_dates() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"holidays":{"extra_dates":["2024-01-20"]}}"#).unwrap();
        assert_eq!(
            config.holidays.extra_dates,
            vec![NaiveDate::from_ymd_opt(2024, 1, 20).unwrap()]
        );
    }
}
