use std::path::PathBuf;

use thiserror::Error;

use crate::domain::Region;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Errors raised by the carbon-intensity pipeline components
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Persistence error at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Scaler for region {0} has not been fitted")]
    ScalerNotFitted(Region),

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("Model error: {0}")]
    Model(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown appliance type: {0}")]
    UnknownAppliance(String),
}

impl PipelineError {
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Persistence {
            path: path.into(),
            source,
        }
    }

    pub fn shape(expected: impl ToString, actual: impl ToString) -> Self {
        PipelineError::ShapeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Transient failures abort a single cycle and are retried on the next one
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::Fetch(_) | PipelineError::MalformedResponse(_)
        )
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            PipelineError::MalformedResponse(error.to_string())
        } else {
            PipelineError::Fetch(error.to_string())
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(error: serde_json::Error) -> Self {
        PipelineError::Serialization(error.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(error: csv::Error) -> Self {
        PipelineError::Serialization(error.to_string())
    }
}

impl From<bincode::Error> for PipelineError {
    fn from(error: bincode::Error) -> Self {
        PipelineError::Serialization(error.to_string())
    }
}
