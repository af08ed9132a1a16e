//! Stage contracts and the estimators shipped with the crate.
pub mod classifier_trait;
pub mod factory;
pub mod gbdt;
pub mod params;
pub mod stage_traits;

pub use classifier_trait::Estimator;
pub use params::{ParamSet, ParamValue};
pub use stage_traits::{Resampler, Transformer};
