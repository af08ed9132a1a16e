//! Preprocessing stages.
//!
//! Provides a per-column mean/std standard scaler usable as the
//! `preprocessor` stage of a pipeline.

use ndarray::{Array1, Array2, Axis};

use crate::error::{EvalError, Result};
use crate::models::params::{unknown_param, ParamValue};
use crate::models::stage_traits::Transformer;

/// Per-column mean and standard deviation.
#[derive(Clone, Debug, PartialEq)]
pub struct Scaler {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl Scaler {
    /// Minimum stddev to avoid division by zero when transforming.
    const MIN_STD: f64 = 1e-6;
}

/// Fit a `Scaler` from a matrix where rows are samples and columns are features.
pub fn fit_scaler(x: &Array2<f64>) -> Result<Scaler> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(EvalError::estimator("fit_scaler requires a non-empty matrix"));
    }
    let mean = x
        .mean_axis(Axis(0))
        .ok_or_else(|| EvalError::estimator("fit_scaler requires at least one row"))?;
    let std = x
        .std_axis(Axis(0), 0.0)
        .mapv(|s| if s.is_finite() { s.max(Scaler::MIN_STD) } else { Scaler::MIN_STD });
    Ok(Scaler { mean, std })
}

/// Transform all rows using the provided `Scaler`.
pub fn transform_all(x: &Array2<f64>, sc: &Scaler) -> Result<Array2<f64>> {
    if x.ncols() != sc.mean.len() {
        return Err(EvalError::DimensionMismatch(format!(
            "scaler was fitted on {} features but received {}",
            sc.mean.len(),
            x.ncols()
        )));
    }
    Ok((x - &sc.mean) / &sc.std)
}

/// Standardization stage: `(x - mean) / std`, fitted on the training rows only.
#[derive(Clone, Debug)]
pub struct StandardScaler {
    with_mean: bool,
    with_std: bool,
    fitted: Option<Scaler>,
}

impl StandardScaler {
    pub fn new() -> Self {
        StandardScaler {
            with_mean: true,
            with_std: true,
            fitted: None,
        }
    }

    pub fn scaler(&self) -> Option<&Scaler> {
        self.fitted.as_ref()
    }
}

impl Default for StandardScaler {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for StandardScaler {
    fn fit_transform(&mut self, x: &Array2<f64>, _y: &Array1<usize>) -> Result<Array2<f64>> {
        let mut scaler = fit_scaler(x)?;
        if !self.with_mean {
            scaler.mean.fill(0.0);
        }
        if !self.with_std {
            scaler.std.fill(1.0);
        }
        let out = transform_all(x, &scaler)?;
        self.fitted = Some(scaler);
        Ok(out)
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let scaler = self
            .fitted
            .as_ref()
            .ok_or_else(|| EvalError::estimator("StandardScaler has not been fitted"))?;
        transform_all(x, scaler)
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "with_mean" => self.with_mean = value.as_bool(name)?,
            "with_std" => self.with_std = value.as_bool(name)?,
            _ => return Err(unknown_param(self.name(), name)),
        }
        Ok(())
    }

    fn clone_unfitted(&self) -> Box<dyn Transformer> {
        Box::new(StandardScaler {
            with_mean: self.with_mean,
            with_std: self.with_std,
            fitted: None,
        })
    }

    fn name(&self) -> &str {
        "standard_scaler"
    }
}
