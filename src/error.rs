//! Error taxonomy for the evaluation core.

use thiserror::Error;

use crate::metrics::MetricKind;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EvalError>;

#[derive(Error, Debug)]
pub enum EvalError {
    /// Invalid run configuration. Raised before any fold is evaluated.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Per-model arrays of unequal length during normalization.
    #[error("Shape error for model '{model}': column '{column}' has {found} values, expected {expected}")]
    Shape {
        model: String,
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Metric undefined on a fold. Only surfaced under `FoldPolicy::Strict`.
    #[error("Metric '{metric}' is undefined on fold {fold}: {reason}")]
    UndefinedMetric {
        metric: MetricKind,
        fold: usize,
        reason: String,
    },

    /// A fold's fit or predict step failed. Only surfaced under `FoldPolicy::Strict`.
    #[error("Fold {fold} failed: {source}")]
    Fold {
        fold: usize,
        #[source]
        source: Box<EvalError>,
    },

    #[error("No candidate produced a defined '{metric}' score")]
    NoValidCandidate { metric: MetricKind },

    #[error("Estimator error: {0}")]
    Estimator(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl EvalError {
    pub fn config(msg: impl Into<String>) -> Self {
        EvalError::Config(msg.into())
    }

    pub fn estimator(msg: impl Into<String>) -> Self {
        EvalError::Estimator(msg.into())
    }
}
