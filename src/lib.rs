//! Cross-validated evaluation and grid search for classification pipelines.
//!
//! Data flows one way: a [`pipeline::Pipeline`] is assembled from optional
//! stages and a terminal estimator, [`evaluation::evaluate`] or
//! [`search::search`] run it under a [`cross_validation::CvPlan`] with the
//! fixed [`metrics::ScoringSet`], and [`normalize::normalize`] flattens the
//! raw per-fold arrays into one row per (model, fold).
pub mod config;
pub mod cross_validation;
pub mod error;
pub mod evaluation;
pub mod feature_selection;
pub mod io;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod preprocessing;
pub mod resampling;
pub mod search;

pub use error::{EvalError, Result};
pub use evaluation::{evaluate, evaluate_models, EvaluateOptions, FoldPolicy, RawResultSet};
pub use metrics::{ClassificationMode, MetricKind};
pub use normalize::{normalize, NormalizedTable, Table};
pub use pipeline::{assemble, Pipeline, PipelineParts, StageName};
pub use search::{search, FittedSearch, ParamGrid, SearchOptions};
