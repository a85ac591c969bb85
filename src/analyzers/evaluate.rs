use crate::analyzers::types::{ErrorMetrics, LineEvaluation};
use crate::analyzers::utility::{mean, stddev, variance};
use crate::error::{PipelineError, Result};
use crate::models::{ModelStore, SpeedModel};
use crate::output::read_json_array;
use crate::ping::EnrichedPing;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Mean squared error, mean absolute error and coefficient of determination.
///
/// When the observations are constant, R² is 1.0 for a perfect prediction
/// and 0.0 otherwise. Returns `None` for empty or mismatched input.
pub fn error_metrics(observed: &[f64], predicted: &[f64]) -> Option<ErrorMetrics> {
    if observed.is_empty() || observed.len() != predicted.len() {
        return None;
    }

    let n = observed.len() as f64;
    let residuals: Vec<f64> = observed.iter().zip(predicted).map(|(o, p)| o - p).collect();
    let ss_res: f64 = residuals.iter().map(|r| r * r).sum();
    let mae = residuals.iter().map(|r| r.abs()).sum::<f64>() / n;

    let observed_mean = mean(observed);
    let ss_tot: f64 = observed.iter().map(|o| (o - observed_mean).powi(2)).sum();
    let r2 = if ss_tot == 0.0 {
        if ss_res == 0.0 { 1.0 } else { 0.0 }
    } else {
        1.0 - ss_res / ss_tot
    };

    Some(ErrorMetrics {
        samples: observed.len(),
        mse: ss_res / n,
        mae,
        r2,
    })
}

/// Scores one test sequence against a speed model. Pings without a reported
/// speed or an hour are skipped.
pub fn score_sequence<M: SpeedModel>(pings: &[EnrichedPing], model: &M) -> Option<ErrorMetrics> {
    let (observed, predicted): (Vec<f64>, Vec<f64>) = pings
        .iter()
        .filter_map(|p| {
            let speed = p.ping.speed?;
            let hour = p.hour_of_day?;
            Some((speed, model.predict_speed(hour)?))
        })
        .unzip();
    error_metrics(&observed, &predicted)
}

/// Collects per-file metrics and summarizes them per line.
#[derive(Debug, Default)]
pub struct Evaluator {
    per_line: BTreeMap<String, Vec<ErrorMetrics>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, line_id: &str, metrics: ErrorMetrics) {
        self.per_line
            .entry(line_id.to_string())
            .or_default()
            .push(metrics);
    }

    pub fn summaries(&self) -> Vec<LineEvaluation> {
        self.per_line
            .iter()
            .map(|(line_id, runs)| {
                let mse: Vec<f64> = runs.iter().map(|m| m.mse).collect();
                let mae: Vec<f64> = runs.iter().map(|m| m.mae).collect();
                let r2: Vec<f64> = runs.iter().map(|m| m.r2).collect();
                let (mse_mean, mae_mean, r2_mean) = (mean(&mse), mean(&mae), mean(&r2));

                LineEvaluation {
                    line_id: line_id.clone(),
                    files: runs.len(),
                    mse_mean,
                    mse_variance: variance(&mse, mse_mean),
                    mse_std: stddev(&mse, mse_mean),
                    mae_mean,
                    mae_variance: variance(&mae, mae_mean),
                    mae_std: stddev(&mae, mae_mean),
                    r2_mean,
                    r2_variance: variance(&r2, r2_mean),
                    r2_std: stddev(&r2, r2_mean),
                }
            })
            .collect()
    }
}

fn cleaned_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_cleaned = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with("_cleaned.json"));
        if path.is_file() && is_cleaned {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Scores every cleaned route file in `test_dir` against the models in
/// `store`. Lines without a model are skipped with a warning.
#[tracing::instrument(skip_all, fields(test_dir = %test_dir.display()))]
pub fn evaluate_dir(test_dir: &Path, store: &ModelStore) -> Result<Vec<LineEvaluation>> {
    let mut evaluator = Evaluator::new();

    for path in cleaned_files(test_dir)? {
        let pings: Vec<EnrichedPing> = match read_json_array(&path) {
            Ok(pings) => pings,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Skipping unreadable test file");
                continue;
            }
        };

        let mut by_line: BTreeMap<&str, Vec<EnrichedPing>> = BTreeMap::new();
        for ping in &pings {
            by_line
                .entry(ping.ping.line_id.as_str())
                .or_default()
                .push(ping.clone());
        }

        for (line_id, sequence) in by_line {
            let model = match store.load_speed_model(line_id) {
                Ok(model) => model,
                Err(e @ PipelineError::ModelNotFound { .. }) => {
                    warn!(line_id, "{e}");
                    continue;
                }
                Err(e) => {
                    warn!(line_id, error = %e, "Model could not be loaded");
                    continue;
                }
            };

            match score_sequence(&sequence, &model) {
                Some(metrics) => {
                    debug!(line_id, file = %path.display(), mse = metrics.mse, "Scored");
                    evaluator.record(line_id, metrics);
                }
                None => debug!(line_id, file = %path.display(), "Nothing to score"),
            }
        }
    }

    let summaries = evaluator.summaries();
    info!(lines = summaries.len(), "Evaluation complete");
    Ok(summaries)
}
