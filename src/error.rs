//! Error taxonomy for the conditioning pipeline.
//!
//! Every variant is local to one record, file, group or line. Callers log
//! and move on to the next sibling; nothing here aborts a corpus run.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Input could not be read as a sequence of JSON values, even after repair.
    #[error("could not decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A record lacks a key the current stage needs.
    #[error("record is missing required field `{field}`")]
    MissingField { field: &'static str },

    /// A numeric or coordinate string could not be parsed.
    #[error("could not parse {field} from {value:?}")]
    Parse { field: &'static str, value: String },

    #[error("no {kind} model found for line {line_id}")]
    ModelNotFound { line_id: String, kind: String },

    /// Every point of a vehicle-line group was labelled noise.
    #[error("no route cluster for vehicle {vehicle_id} on line {line_id}")]
    EmptyCluster { vehicle_id: String, line_id: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

impl PipelineError {
    /// Attaches the offending file to a JSON syntax error.
    pub fn decode(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        PipelineError::Decode {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
