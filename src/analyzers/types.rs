//! Data types used by the aggregation and evaluation stages.

use serde::{Deserialize, Serialize};

/// One row of the model-facing table: mean metrics for a line at one hour
/// of the day. Written to and read from `hourly_means.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyAggregate {
    pub line_id: String,
    pub hour_of_day: u8,
    /// Number of pings with a reported speed in this bucket.
    pub observations: usize,
    pub mean_speed: f64,
    pub mean_real_velocity_kmh: Option<f64>,
    pub mean_latitude: Option<f64>,
    pub mean_longitude: Option<f64>,
}

/// Prediction error of a model over one test file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ErrorMetrics {
    pub samples: usize,
    pub mse: f64,
    pub mae: f64,
    pub r2: f64,
}

/// Spread of each metric across the test files of one line.
///
/// Kept flat so it serializes as a single CSV row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineEvaluation {
    pub line_id: String,
    pub files: usize,
    pub mse_mean: f64,
    pub mse_variance: f64,
    pub mse_std: f64,
    pub mae_mean: f64,
    pub mae_variance: f64,
    pub mae_std: f64,
    pub r2_mean: f64,
    pub r2_variance: f64,
    pub r2_std: f64,
}
