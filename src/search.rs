//! Exhaustive grid search over pipeline hyperparameters.
//!
//! The searched pipeline is `preprocessor -> clf` only; feature selection and
//! resampling are not part of the search. Every (candidate, fold) pair is an
//! independent unit of work. The winner is chosen on the refit metric alone
//! and refitted on all rows.
use std::collections::BTreeMap;
use std::time::Instant;

use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cross_validation::CvPlan;
use crate::error::{EvalError, Result};
use crate::evaluation::{prepare_scoring, run_fold, FoldFailure, FoldOutcome, FoldPolicy, RawResultSet};
use crate::metrics::{ClassificationMode, MetricKind};
use crate::models::params::{format_params, ParamSet, ParamValue};
use crate::models::{Estimator, Transformer};
use crate::pipeline::{assemble, Pipeline};

/// Parameter name to candidate values. Keys use `stage__param` routing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamGrid(BTreeMap<String, Vec<ParamValue>>);

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<V: Into<ParamValue>>(mut self, key: &str, values: Vec<V>) -> Self {
        self.insert(key, values.into_iter().map(Into::into).collect());
        self
    }

    pub fn insert(&mut self, key: &str, values: Vec<ParamValue>) {
        self.0.insert(key.to_string(), values);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of grid points.
    pub fn n_candidates(&self) -> usize {
        if self.0.is_empty() {
            0
        } else {
            self.0.values().map(Vec::len).product()
        }
    }

    /// A grid with no keys, or a key with no values, has no grid points.
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(EvalError::config("param_grid is empty"));
        }
        if let Some((key, _)) = self.0.iter().find(|(_, values)| values.is_empty()) {
            return Err(EvalError::config(format!(
                "param_grid entry '{}' has no values",
                key
            )));
        }
        Ok(())
    }

    /// Cartesian product in key order; the last key varies fastest.
    pub fn candidates(&self) -> Vec<ParamSet> {
        if self.0.is_empty() {
            return Vec::new();
        }
        let mut out = vec![ParamSet::new()];
        for (key, values) in &self.0 {
            out = out
                .into_iter()
                .flat_map(|base| {
                    values.iter().map(move |v| {
                        let mut params = base.clone();
                        params.insert(key.clone(), v.clone());
                        params
                    })
                })
                .collect();
        }
        out
    }
}

impl FromIterator<(String, Vec<ParamValue>)> for ParamGrid {
    fn from_iter<I: IntoIterator<Item = (String, Vec<ParamValue>)>>(iter: I) -> Self {
        ParamGrid(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    /// The only metric that decides the winner.
    pub refit_metric: MetricKind,
    pub mode: ClassificationMode,
    pub beta: f64,
    pub return_train_score: bool,
    pub policy: FoldPolicy,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            refit_metric: MetricKind::RocAuc,
            mode: ClassificationMode::Binary,
            beta: 2.0,
            return_train_score: false,
            policy: FoldPolicy::Lenient,
        }
    }
}

/// Cross-validated results for one grid point.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateResult {
    pub index: usize,
    pub params: ParamSet,
    pub test_scores: BTreeMap<MetricKind, Vec<Option<f64>>>,
    pub train_scores: Option<BTreeMap<MetricKind, Vec<Option<f64>>>>,
    pub fit_time: Vec<f64>,
    pub score_time: Vec<f64>,
    /// Mean over every fold; `NaN` if any fold is missing.
    pub mean_test: BTreeMap<MetricKind, f64>,
    /// Population standard deviation over every fold; `NaN` if any fold is missing.
    pub std_test: BTreeMap<MetricKind, f64>,
    /// 1 is best. Candidates with a `NaN` mean share the last rank.
    pub rank_test: BTreeMap<MetricKind, usize>,
    pub mean_train: Option<BTreeMap<MetricKind, f64>>,
    pub failures: Vec<FoldFailure>,
}

impl CandidateResult {
    pub fn mean_fit_time(&self) -> f64 {
        mean_std(self.fit_time.iter().map(|&t| Some(t))).0
    }

    pub fn mean_score_time(&self) -> f64 {
        mean_std(self.score_time.iter().map(|&t| Some(t))).0
    }
}

/// Outcome of a grid search with the refitted winner.
#[derive(Debug)]
pub struct FittedSearch {
    pub best_params: ParamSet,
    pub best_index: usize,
    /// Mean cross-validated `refit_metric` of the winner.
    pub best_score: f64,
    /// Winning pipeline refitted on all rows.
    pub best_estimator: Pipeline,
    pub refit_metric: MetricKind,
    /// Seconds spent on the final refit.
    pub refit_time: f64,
    pub cv_results: Vec<CandidateResult>,
    pub n_splits: usize,
}

impl FittedSearch {
    pub fn best_result(&self) -> &CandidateResult {
        &self.cv_results[self.best_index]
    }

    /// Stable, sortable label for a candidate, e.g. `candidate_03`.
    pub fn candidate_label(&self, index: usize) -> String {
        let width = self.cv_results.len().saturating_sub(1).to_string().len();
        format!("candidate_{:0width$}", index, width = width)
    }

    /// Per-candidate test results keyed by candidate label, ready for normalization.
    pub fn raw_results(&self) -> BTreeMap<String, RawResultSet> {
        self.cv_results
            .iter()
            .map(|c| {
                (
                    self.candidate_label(c.index),
                    RawResultSet {
                        fit_time: c.fit_time.clone(),
                        score_time: c.score_time.clone(),
                        scores: c.test_scores.clone(),
                        failures: c.failures.clone(),
                    },
                )
            })
            .collect()
    }
}

/// A single missing or `NaN` fold poisons both statistics.
fn mean_std<I: Iterator<Item = Option<f64>>>(values: I) -> (f64, f64) {
    let defined: Option<Vec<f64>> = values.map(|v| v.filter(|x| !x.is_nan())).collect();
    let defined = match defined {
        Some(d) if !d.is_empty() => d,
        _ => return (f64::NAN, f64::NAN),
    };
    let n = defined.len() as f64;
    let mean = defined.iter().sum::<f64>() / n;
    let var = defined.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn collect_scores<'a, I>(kinds: &[MetricKind], maps: I) -> BTreeMap<MetricKind, Vec<Option<f64>>>
where
    I: Iterator<Item = &'a BTreeMap<MetricKind, Option<f64>>> + Clone,
{
    kinds
        .iter()
        .map(|&k| (k, maps.clone().map(|m| m.get(&k).copied().flatten()).collect()))
        .collect()
}

fn summarize(scores: &BTreeMap<MetricKind, Vec<Option<f64>>>) -> (BTreeMap<MetricKind, f64>, BTreeMap<MetricKind, f64>) {
    let mut means = BTreeMap::new();
    let mut stds = BTreeMap::new();
    for (&kind, values) in scores {
        let (mean, std) = mean_std(values.iter().copied());
        means.insert(kind, mean);
        stds.insert(kind, std);
    }
    (means, stds)
}

/// Rank candidates by mean, 1 = best. Ties share the lower rank.
fn rank(means: &[f64]) -> Vec<usize> {
    let n_defined = means.iter().filter(|m| !m.is_nan()).count();
    means
        .iter()
        .map(|&m| {
            if m.is_nan() {
                n_defined + 1
            } else {
                1 + means.iter().filter(|&&other| other > m).count()
            }
        })
        .collect()
}

/// Highest mean refit score; ties go to the lowest index.
fn select_best(cv_results: &[CandidateResult], metric: MetricKind) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for candidate in cv_results {
        let score = candidate.mean_test.get(&metric).copied().unwrap_or(f64::NAN);
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, current)) if score <= current => {}
            _ => best = Some((candidate.index, score)),
        }
    }
    best
}

/// Run an exhaustive grid search and refit the best configuration on all rows.
pub fn search(
    x: &Array2<f64>,
    y: &Array1<usize>,
    estimator: Box<dyn Estimator>,
    param_grid: &ParamGrid,
    cv_plan: &dyn CvPlan,
    preprocessor: Option<Box<dyn Transformer>>,
    options: &SearchOptions,
) -> Result<FittedSearch> {
    param_grid.validate()?;
    let scoring = prepare_scoring(x, y, options.mode, options.beta)?;
    let base = assemble(Some(estimator), preprocessor, None, None)?;

    // Apply every grid point to its own template so unknown parameters and
    // wrongly typed values fail before any fold runs.
    let candidates = param_grid.candidates();
    let templates = candidates
        .iter()
        .map(|params| -> Result<Pipeline> {
            let mut pipeline = base.clone_unfitted();
            pipeline.set_params(params)?;
            Ok(pipeline)
        })
        .collect::<Result<Vec<Pipeline>>>()?;

    let folds = cv_plan.folds(y)?;
    let n_folds = folds.len();
    if n_folds == 0 {
        return Err(EvalError::config("cross-validation plan produced no folds"));
    }
    log::info!(
        "Grid search: {} candidates x {} folds = {} fits, refit on {}",
        candidates.len(),
        n_folds,
        candidates.len() * n_folds,
        options.refit_metric
    );

    let units: Vec<(usize, usize)> = (0..templates.len())
        .flat_map(|c| (0..n_folds).map(move |f| (c, f)))
        .collect();
    let outcomes = units
        .par_iter()
        .map(|&(c, f)| {
            run_fold(
                &templates[c],
                x,
                y,
                &folds[f],
                &scoring,
                options.return_train_score,
                options.policy,
            )
        })
        .collect::<Result<Vec<FoldOutcome>>>()?;

    let kinds = scoring.kinds();
    let mut cv_results: Vec<CandidateResult> = outcomes
        .chunks(n_folds)
        .zip(candidates)
        .enumerate()
        .map(|(index, (chunk, params))| {
            let test_scores = collect_scores(&kinds, chunk.iter().map(|o| &o.test));
            let train_scores = if options.return_train_score {
                Some(collect_scores(&kinds, chunk.iter().filter_map(|o| o.train.as_ref())))
            } else {
                None
            };
            let (mean_test, std_test) = summarize(&test_scores);
            let mean_train = train_scores.as_ref().map(|s| summarize(s).0);
            let raw = RawResultSet::from_outcomes(&kinds, chunk);
            CandidateResult {
                index,
                params,
                test_scores,
                train_scores,
                fit_time: raw.fit_time,
                score_time: raw.score_time,
                mean_test,
                std_test,
                rank_test: BTreeMap::new(),
                mean_train,
                failures: raw.failures,
            }
        })
        .collect();

    for &kind in &kinds {
        let means: Vec<f64> = cv_results
            .iter()
            .map(|c| c.mean_test.get(&kind).copied().unwrap_or(f64::NAN))
            .collect();
        for (candidate, r) in cv_results.iter_mut().zip(rank(&means)) {
            candidate.rank_test.insert(kind, r);
        }
    }

    let (best_index, best_score) = select_best(&cv_results, options.refit_metric).ok_or(
        EvalError::NoValidCandidate {
            metric: options.refit_metric,
        },
    )?;
    let best_params = cv_results[best_index].params.clone();
    log::info!(
        "Best candidate {} ({}) with mean {} = {:.4}",
        best_index,
        format_params(&best_params),
        options.refit_metric,
        best_score
    );

    let mut best_estimator = templates[best_index].clone_unfitted();
    let refit_start = Instant::now();
    best_estimator.fit(x, y)?;
    let refit_time = refit_start.elapsed().as_secs_f64();

    Ok(FittedSearch {
        best_params,
        best_index,
        best_score,
        best_estimator,
        refit_metric: options.refit_metric,
        refit_time,
        cv_results,
        n_splits: n_folds,
    })
}
