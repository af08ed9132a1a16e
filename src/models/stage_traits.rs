//! Capability contracts for the optional (non-terminal) pipeline stages.
use ndarray::{Array1, Array2};

use crate::error::Result;
use crate::models::params::{unknown_param, ParamValue};

/// A stage that learns from the training rows and maps features to features.
///
/// Used for preprocessing and feature selection. `transform` applies the
/// state learned by the last `fit_transform` to held-out rows.
pub trait Transformer: Send + Sync {
    fn fit_transform(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<Array2<f64>>;

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    fn set_param(&mut self, name: &str, _value: &ParamValue) -> Result<()> {
        Err(unknown_param(self.name(), name))
    }

    fn clone_unfitted(&self) -> Box<dyn Transformer>;

    fn name(&self) -> &str;
}

/// A training-only stage that may change the number of rows.
///
/// The column schema must be preserved. Resamplers are skipped at prediction time.
pub trait Resampler: Send + Sync {
    fn fit_resample(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<usize>,
    ) -> Result<(Array2<f64>, Array1<usize>)>;

    fn set_param(&mut self, name: &str, _value: &ParamValue) -> Result<()> {
        Err(unknown_param(self.name(), name))
    }

    fn clone_unfitted(&self) -> Box<dyn Resampler>;

    fn name(&self) -> &str;
}
