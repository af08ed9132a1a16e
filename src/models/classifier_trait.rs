use ndarray::{Array1, Array2};

use crate::error::Result;
use crate::models::params::ParamValue;

/// Terminal pipeline stage: a classifier that can be fitted and queried.
///
/// Labels are class ids (`usize`). In binary mode class `1` is the positive
/// label. Implementations must be `Send + Sync` so folds and grid points can
/// be evaluated in parallel, each on its own unfitted copy.
pub trait Estimator: Send + Sync {
    /// Fit the model on `x` (n_samples, n_features) and labels `y`.
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<()>;

    /// Predict a class id for every row of `x`.
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<usize>>;

    /// Predict class probabilities, shape (n_samples, n_classes).
    /// Columns follow the order of [`Estimator::classes`].
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    /// Sorted class ids seen during `fit`. Empty before fitting.
    fn classes(&self) -> &[usize];

    /// Set one hyperparameter by name.
    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()>;

    /// An unfitted estimator carrying the same hyperparameters.
    fn clone_unfitted(&self) -> Box<dyn Estimator>;

    /// Optional human readable name for the model
    fn name(&self) -> &str {
        "classifier"
    }
}
