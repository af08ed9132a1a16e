#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use classifier_eval::error::{EvalError, Result};
use classifier_eval::models::params::{unknown_param, ParamValue};
use classifier_eval::models::{Estimator, Resampler, Transformer};
use ndarray::{Array1, Array2, Axis};

// ----
// Fake estimator
// ----

/// Binary classifier that thresholds one feature column at the midpoint of
/// the two class means.
///
/// `depth` picks the column (`depth - 1`, wrapping). Every `fit` bumps the
/// shared counter, including fits on clones.
#[derive(Clone)]
pub struct ThresholdClassifier {
    pub depth: i64,
    /// Fail `fit` when the training partition has exactly this many rows.
    /// Settable as `fail_on_rows`; a negative value clears it.
    pub fail_on_rows: Option<usize>,
    /// Fail prediction on inputs with exactly this many rows.
    pub fail_predict_on_rows: Option<usize>,
    fits: Arc<AtomicUsize>,
    threshold: Option<(usize, f64, f64)>,
    classes: Vec<usize>,
}

impl ThresholdClassifier {
    pub fn new(depth: i64) -> Self {
        ThresholdClassifier {
            depth,
            fail_on_rows: None,
            fail_predict_on_rows: None,
            fits: Arc::new(AtomicUsize::new(0)),
            threshold: None,
            classes: Vec::new(),
        }
    }

    /// Handle on the fit counter shared by every clone.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.fits)
    }

    fn column(&self, ncols: usize) -> usize {
        ((self.depth.max(1) - 1) as usize) % ncols.max(1)
    }
}

pub fn fit_count(counter: &Arc<AtomicUsize>) -> usize {
    counter.load(Ordering::SeqCst)
}

impl Estimator for ThresholdClassifier {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<()> {
        self.fits.fetch_add(1, Ordering::SeqCst);
        if Some(x.nrows()) == self.fail_on_rows {
            return Err(EvalError::estimator("fit failed on purpose"));
        }

        let mut classes = y.to_vec();
        classes.sort_unstable();
        classes.dedup();
        if classes.len() > 2 {
            return Err(EvalError::estimator("ThresholdClassifier is binary only"));
        }

        let col = self.column(x.ncols());
        let feature = x.column(col);
        let positive = *classes.last().ok_or_else(|| EvalError::estimator("no labels"))?;
        let mean_of = |want_positive: bool| {
            let values: Vec<f64> = feature
                .iter()
                .zip(y.iter())
                .filter(|(_, label)| (**label == positive) == want_positive)
                .map(|(&v, _)| v)
                .collect();
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        };
        let (pos_mean, neg_mean) = (mean_of(true), mean_of(false));
        let sign = if pos_mean >= neg_mean { 1.0 } else { -1.0 };
        self.threshold = Some((col, (pos_mean + neg_mean) / 2.0, sign));
        self.classes = classes;
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<usize>> {
        let proba = self.predict_proba(x)?;
        Ok(proba
            .outer_iter()
            .map(|row| {
                let best = if row.len() == 2 && row[1] >= 0.5 { 1 } else { 0 };
                self.classes[best]
            })
            .collect())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if Some(x.nrows()) == self.fail_predict_on_rows {
            return Err(EvalError::estimator("predict failed on purpose"));
        }
        let (col, threshold, sign) = self
            .threshold
            .ok_or_else(|| EvalError::estimator("ThresholdClassifier has not been fitted"))?;
        if self.classes.len() == 1 {
            return Ok(Array2::ones((x.nrows(), 1)));
        }
        let mut proba = Array2::zeros((x.nrows(), 2));
        for (i, v) in x.column(col).iter().enumerate() {
            let p = 1.0 / (1.0 + (-(v - threshold) * sign * 4.0).exp());
            proba[(i, 0)] = 1.0 - p;
            proba[(i, 1)] = p;
        }
        Ok(proba)
    }

    fn classes(&self) -> &[usize] {
        &self.classes
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "depth" => {
                self.depth = match value {
                    ParamValue::Int(v) => *v,
                    other => return Err(EvalError::config(format!("depth expects an integer, got {}", other))),
                }
            }
            "fail_on_rows" => {
                self.fail_on_rows = match value {
                    ParamValue::Int(v) if *v < 0 => None,
                    ParamValue::Int(v) => Some(*v as usize),
                    other => {
                        return Err(EvalError::config(format!(
                            "fail_on_rows expects an integer, got {}",
                            other
                        )))
                    }
                }
            }
            _ => return Err(unknown_param(self.name(), name)),
        }
        Ok(())
    }

    fn clone_unfitted(&self) -> Box<dyn Estimator> {
        Box::new(ThresholdClassifier {
            depth: self.depth,
            fail_on_rows: self.fail_on_rows,
            fail_predict_on_rows: self.fail_predict_on_rows,
            fits: Arc::clone(&self.fits),
            threshold: None,
            classes: Vec::new(),
        })
    }

    fn name(&self) -> &str {
        "threshold"
    }
}

// ----
// Fake stages
// ----

/// Passes features through unchanged.
#[derive(Clone, Default)]
pub struct Identity;

impl Transformer for Identity {
    fn fit_transform(&mut self, x: &Array2<f64>, _y: &Array1<usize>) -> Result<Array2<f64>> {
        Ok(x.to_owned())
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        Ok(x.to_owned())
    }

    fn clone_unfitted(&self) -> Box<dyn Transformer> {
        Box::new(Identity)
    }

    fn name(&self) -> &str {
        "identity"
    }
}

/// Drops the last column, which a sampler must never do.
#[derive(Clone, Default)]
pub struct ColumnDroppingSampler;

impl Resampler for ColumnDroppingSampler {
    fn fit_resample(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<(Array2<f64>, Array1<usize>)> {
        let keep: Vec<usize> = (0..x.ncols().saturating_sub(1)).collect();
        Ok((x.select(Axis(1), &keep), y.to_owned()))
    }

    fn clone_unfitted(&self) -> Box<dyn Resampler> {
        Box::new(ColumnDroppingSampler)
    }

    fn name(&self) -> &str {
        "column_dropper"
    }
}

// ----
// Datasets
// ----

/// Balanced binary data. Column 0 separates the classes, column 1 is noise.
pub fn balanced_binary(n: usize) -> (Array2<f64>, Array1<usize>) {
    let y = Array1::from_iter((0..n).map(|i| i % 2));
    let x = Array2::from_shape_fn((n, 2), |(i, c)| {
        let label = (i % 2) as f64;
        if c == 0 {
            label * 2.0 + ((i * 7) % 5) as f64 * 0.1
        } else {
            ((i * 13) % 7) as f64
        }
    });
    (x, y)
}

/// Three classes, each a shifted block along column 0.
pub fn three_class(n: usize) -> (Array2<f64>, Array1<usize>) {
    let y = Array1::from_iter((0..n).map(|i| i % 3));
    let x = Array2::from_shape_fn((n, 2), |(i, c)| {
        if c == 0 {
            (i % 3) as f64 * 3.0 + ((i * 5) % 4) as f64 * 0.2
        } else {
            ((i * 11) % 6) as f64
        }
    });
    (x, y)
}
