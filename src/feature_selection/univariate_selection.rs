//! Univariate feature selection methods following scikit-learn's API.
//!
//! See: https://scikit-learn.org/stable/modules/feature_selection.html#univariate-feature-selection

use std::collections::BTreeMap;

use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2};
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::error::{EvalError, Result};
use crate::models::params::{unknown_param, ParamValue};
use crate::models::stage_traits::Transformer;

/// Compute row-wise (squared) Euclidean norms of a 2D array.
///
/// # Parameters
///
/// * `x` - A 2D array of shape (n_samples, n_features) representing the input data.
/// * `squared` - A boolean indicating whether to return squared norms.
///
/// # Returns
///
/// An array of shape (n_samples,) containing the row-wise (squared) Euclidean norms.
pub fn row_norms<S>(x: &ArrayBase<S, Ix2>, squared: bool) -> Array1<f64>
where
    S: Data<Elem = f64>,
{
    x.axis_iter(Axis(0))
        .map(|row| {
            let sum_of_squares: f64 = row.iter().map(|&val| val.powi(2)).sum();
            if squared {
                sum_of_squares
            } else {
                sum_of_squares.sqrt()
            }
        })
        .collect()
}

/// Compute Pearson's r for each feature and the target.
///
/// # Parameters
///
/// * `x` - A 2D array of shape (n_samples, n_features).
/// * `y` - A 1D array of shape (n_samples,) representing the target vector.
/// * `center` - Whether to center both `x` and `y` by subtracting their means.
/// * `force_finite` - Replace non-finite coefficients (e.g. constant features) with 0.0.
///
/// # Returns
///
/// An array of shape (n_features,) with the correlation coefficient of each feature.
pub fn r_regression(x: &Array2<f64>, y: &Array1<f64>, center: bool, force_finite: bool) -> Array1<f64> {
    let n_samples = x.nrows() as f64;

    let (x_means, y_centered) = if center {
        let x_means = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
        let y_mean = y.mean().unwrap_or(0.0);
        (x_means, y - y_mean)
    } else {
        (Array1::zeros(x.ncols()), y.to_owned())
    };

    // Compute the scaled standard deviations via moments
    let x_norms = if center {
        let x_squared_norms = row_norms(&x.t(), true);
        (&x_squared_norms - &(n_samples * &x_means.mapv(|m| m.powi(2)))).mapv(|v| v.max(0.0).sqrt())
    } else {
        row_norms(&x.t(), false)
    };

    let mut correlation_coefficient: Array1<f64> = x
        .columns()
        .into_iter()
        .zip(x_means.iter())
        .map(|(col, &m)| col.mapv(|v| v - m).dot(&y_centered))
        .collect();

    let y_norm = y_centered.dot(&y_centered).sqrt();
    correlation_coefficient /= &x_norms;
    correlation_coefficient /= y_norm;

    if force_finite {
        correlation_coefficient.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
    }

    correlation_coefficient
}

/// Univariate linear regression tests returning F-statistic and p-values.
///
/// # Returns
///
/// A tuple of arrays of shape (n_features,): F-statistics and their p-values.
pub fn f_regression(
    x: &Array2<f64>,
    y: &Array1<f64>,
    center: bool,
    force_finite: bool,
) -> Result<(Array1<f64>, Array1<f64>)> {
    let correlation_coefficient = r_regression(x, y, center, force_finite);
    let deg_of_freedom = y.len() as f64 - if center { 2.0 } else { 1.0 };
    if deg_of_freedom <= 0.0 {
        return Err(EvalError::estimator(format!(
            "f_regression needs more samples than parameters, got {} samples",
            y.len()
        )));
    }

    let corr_coef_squared = correlation_coefficient.mapv(|r| r.powi(2));
    let mut f_statistic = &corr_coef_squared / &corr_coef_squared.mapv(|r2| 1.0 - r2) * deg_of_freedom;

    let f_dist = FisherSnedecor::new(1.0, deg_of_freedom)
        .map_err(|e| EvalError::estimator(format!("invalid F distribution: {}", e)))?;
    let mut p_values = f_statistic.mapv(|f| 1.0 - f_dist.cdf(f));

    if force_finite {
        for (f, p) in f_statistic.iter_mut().zip(p_values.iter_mut()) {
            if f.is_infinite() {
                *f = f64::MAX;
                *p = 0.0;
            } else if f.is_nan() {
                *f = 0.0;
                *p = 1.0;
            }
        }
    }

    Ok((f_statistic, p_values))
}

/// ANOVA F-test of each feature against class labels.
///
/// Between-class and within-class variance give `F` with `(n_classes - 1,
/// n_samples - n_classes)` degrees of freedom. Non-finite results are forced
/// finite: a constant feature scores `0.0` (p = 1), a feature that is
/// constant within every class scores `f64::MAX` (p = 0). With fewer than two
/// classes, or no more samples than classes, every feature scores `0.0`.
///
/// # Returns
///
/// A tuple of arrays of shape (n_features,): F-statistics and their p-values.
pub fn f_classif(x: &Array2<f64>, y: &Array1<usize>) -> Result<(Array1<f64>, Array1<f64>)> {
    if x.nrows() != y.len() {
        return Err(EvalError::DimensionMismatch(format!(
            "f_classif got {} rows but {} labels",
            x.nrows(),
            y.len()
        )));
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, &label) in y.iter().enumerate() {
        groups.entry(label).or_default().push(row);
    }
    let n_samples = y.len();
    let n_classes = groups.len();
    if n_classes < 2 || n_samples <= n_classes {
        log::debug!(
            "f_classif: {} classes over {} samples, scoring every feature 0",
            n_classes,
            n_samples
        );
        return Ok((Array1::zeros(x.ncols()), Array1::ones(x.ncols())));
    }

    let df_between = (n_classes - 1) as f64;
    let df_within = (n_samples - n_classes) as f64;
    let f_dist = FisherSnedecor::new(df_between, df_within)
        .map_err(|e| EvalError::estimator(format!("invalid F distribution: {}", e)))?;

    let mut f_statistic = Array1::zeros(x.ncols());
    let mut p_values = Array1::ones(x.ncols());
    for (j, column) in x.columns().into_iter().enumerate() {
        let grand_mean = column.sum() / n_samples as f64;
        let (mut ss_between, mut ss_within) = (0.0, 0.0);
        for rows in groups.values() {
            let group_mean = rows.iter().map(|&r| column[r]).sum::<f64>() / rows.len() as f64;
            ss_between += rows.len() as f64 * (group_mean - grand_mean).powi(2);
            ss_within += rows.iter().map(|&r| (column[r] - group_mean).powi(2)).sum::<f64>();
        }

        let f = (ss_between / df_between) / (ss_within / df_within);
        let (f, p) = if f.is_nan() {
            (0.0, 1.0)
        } else if f.is_infinite() {
            (f64::MAX, 0.0)
        } else {
            (f, 1.0 - f_dist.cdf(f))
        };
        f_statistic[j] = f;
        p_values[j] = p;
    }

    Ok((f_statistic, p_values))
}

/// Keep the `k` features with the highest ANOVA F-statistic against the labels.
///
/// Selected columns keep their original relative order.
#[derive(Clone, Debug)]
pub struct SelectKBest {
    /// The number of top features to select.
    k: usize,
    selected: Option<Vec<usize>>,
}

impl SelectKBest {
    pub fn new(k: usize) -> Self {
        SelectKBest { k, selected: None }
    }

    /// Indices of the k best features for `(x, y)`, in ascending column order.
    pub fn select(&self, x: &Array2<f64>, y: &Array1<usize>) -> Result<Vec<usize>> {
        if self.k == 0 || self.k > x.ncols() {
            return Err(EvalError::config(format!(
                "SelectKBest k={} must be between 1 and the number of features ({})",
                self.k,
                x.ncols()
            )));
        }
        let (f_scores, _) = f_classif(x, y)?;

        let mut indices: Vec<usize> = (0..f_scores.len()).collect();
        // Highest score first; ties keep the lower column index.
        indices.sort_by(|&i, &j| {
            f_scores[j]
                .partial_cmp(&f_scores[i])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(i.cmp(&j))
        });
        let mut top: Vec<usize> = indices.into_iter().take(self.k).collect();
        top.sort_unstable();
        Ok(top)
    }

    pub fn selected(&self) -> Option<&[usize]> {
        self.selected.as_deref()
    }
}

impl Transformer for SelectKBest {
    fn fit_transform(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<Array2<f64>> {
        let selected = self.select(x, y)?;
        log::trace!("SelectKBest kept columns {:?}", selected);
        let out = x.select(Axis(1), &selected);
        self.selected = Some(selected);
        Ok(out)
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let selected = self
            .selected
            .as_ref()
            .ok_or_else(|| EvalError::estimator("SelectKBest has not been fitted"))?;
        if let Some(&max) = selected.iter().max() {
            if max >= x.ncols() {
                return Err(EvalError::DimensionMismatch(format!(
                    "SelectKBest selected column {} but input has {} columns",
                    max,
                    x.ncols()
                )));
            }
        }
        Ok(x.select(Axis(1), selected))
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "k" => self.k = value.as_usize(name)?,
            _ => return Err(unknown_param(self.name(), name)),
        }
        Ok(())
    }

    fn clone_unfitted(&self) -> Box<dyn Transformer> {
        Box::new(SelectKBest::new(self.k))
    }

    fn name(&self) -> &str {
        "select_k_best"
    }
}
