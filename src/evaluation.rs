//! Fixed cross-validated evaluation of one or more pipelines.
//!
//! Every fold works on its own unfitted copy of the pipeline, predicts once on
//! the held-out rows and scores the full metric set from those predictions.
//! Per-fold values are kept as raw arrays in fold order; nothing is averaged.
use std::collections::BTreeMap;
use std::time::Instant;

use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cross_validation::{CvPlan, Fold};
use crate::error::{EvalError, Result};
use crate::metrics::{ClassificationMode, FoldPredictions, MetricKind, MetricOutcome, ScoringSet};
use crate::pipeline::{Pipeline, PipelineParts};

/// What happens when a fold cannot produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldPolicy {
    /// Record missing values and keep going.
    #[default]
    Lenient,
    /// Abort the run with the first fold error.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluateOptions {
    pub mode: ClassificationMode,
    /// F-beta weight for the `f2_score` metric.
    pub beta: f64,
    pub policy: FoldPolicy,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            mode: ClassificationMode::Binary,
            beta: 2.0,
            policy: FoldPolicy::Lenient,
        }
    }
}

/// A fold whose fit or predict step failed under the lenient policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldFailure {
    pub fold: usize,
    pub message: String,
}

/// Raw per-fold results for one model. Every vector has one entry per fold.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RawResultSet {
    /// Seconds spent fitting, per fold.
    pub fit_time: Vec<f64>,
    /// Seconds spent predicting and scoring, per fold.
    pub score_time: Vec<f64>,
    /// `None` marks a value that could not be computed on that fold.
    pub scores: BTreeMap<MetricKind, Vec<Option<f64>>>,
    pub failures: Vec<FoldFailure>,
}

impl RawResultSet {
    pub fn n_folds(&self) -> usize {
        self.fit_time.len()
    }

    pub fn metric(&self, kind: MetricKind) -> Option<&[Option<f64>]> {
        self.scores.get(&kind).map(Vec::as_slice)
    }

    pub(crate) fn from_outcomes(kinds: &[MetricKind], outcomes: &[FoldOutcome]) -> Self {
        let mut scores: BTreeMap<MetricKind, Vec<Option<f64>>> = kinds
            .iter()
            .map(|&k| (k, Vec::with_capacity(outcomes.len())))
            .collect();
        for outcome in outcomes {
            for (kind, values) in scores.iter_mut() {
                values.push(outcome.test.get(kind).copied().flatten());
            }
        }
        RawResultSet {
            fit_time: outcomes.iter().map(|o| o.fit_time).collect(),
            score_time: outcomes.iter().map(|o| o.score_time).collect(),
            scores,
            failures: outcomes
                .iter()
                .filter_map(|o| {
                    o.failure.as_ref().map(|message| FoldFailure {
                        fold: o.fold,
                        message: message.clone(),
                    })
                })
                .collect(),
        }
    }
}

/// Everything one (pipeline, fold) unit produced.
#[derive(Debug, Clone)]
pub(crate) struct FoldOutcome {
    pub fold: usize,
    pub fit_time: f64,
    pub score_time: f64,
    pub test: BTreeMap<MetricKind, Option<f64>>,
    pub train: Option<BTreeMap<MetricKind, Option<f64>>>,
    pub failure: Option<String>,
}

/// Validate the inputs shared by both evaluation modes and build the scoring set.
pub(crate) fn prepare_scoring(
    x: &Array2<f64>,
    y: &Array1<usize>,
    mode: ClassificationMode,
    beta: f64,
) -> Result<ScoringSet> {
    if x.nrows() != y.len() {
        return Err(EvalError::DimensionMismatch(format!(
            "feature matrix has {} rows but {} labels",
            x.nrows(),
            y.len()
        )));
    }
    if y.is_empty() {
        return Err(EvalError::config("cannot evaluate on an empty dataset"));
    }
    mode.validate_labels(y)?;
    ScoringSet::new(mode, beta)
}

fn resolve_outcomes(
    outcomes: Vec<(MetricKind, MetricOutcome)>,
    fold: usize,
    policy: FoldPolicy,
) -> Result<BTreeMap<MetricKind, Option<f64>>> {
    let mut values = BTreeMap::new();
    for (metric, outcome) in outcomes {
        let value = match outcome {
            Ok(v) => Some(v),
            Err(reason) => match policy {
                FoldPolicy::Strict => return Err(EvalError::UndefinedMetric { metric, fold, reason }),
                FoldPolicy::Lenient => {
                    log::debug!("{} undefined on fold {}: {}", metric, fold, reason);
                    None
                }
            },
        };
        values.insert(metric, value);
    }
    Ok(values)
}

fn missing_scores(scoring: &ScoringSet) -> BTreeMap<MetricKind, Option<f64>> {
    scoring.kinds().into_iter().map(|k| (k, None)).collect()
}

/// Under `Lenient` a fit or predict error becomes the fold's failure message.
fn tolerate(err: EvalError, fold: usize, policy: FoldPolicy, stage: &str) -> Result<String> {
    match policy {
        FoldPolicy::Strict => Err(EvalError::Fold {
            fold,
            source: Box::new(err),
        }),
        FoldPolicy::Lenient => {
            log::warn!("Fold {} {} failed, recording missing values: {}", fold, stage, err);
            Ok(format!("{}: {}", stage, err))
        }
    }
}

/// Fit a fresh copy of `template` on the fold's training rows and score it.
pub(crate) fn run_fold(
    template: &Pipeline,
    x: &Array2<f64>,
    y: &Array1<usize>,
    fold: &Fold,
    scoring: &ScoringSet,
    score_train: bool,
    policy: FoldPolicy,
) -> Result<FoldOutcome> {
    let x_train = x.select(Axis(0), &fold.train);
    let y_train = y.select(Axis(0), &fold.train);
    let x_test = x.select(Axis(0), &fold.test);
    let y_test = y.select(Axis(0), &fold.test);

    let mut pipeline = template.clone_unfitted();

    let fit_start = Instant::now();
    let fitted = pipeline.fit(&x_train, &y_train);
    let fit_time = fit_start.elapsed().as_secs_f64();

    let score_start = Instant::now();
    let scored = match fitted {
        Ok(()) => FoldPredictions::from_pipeline(&pipeline, &x_test, scoring.needs_proba())
            .map_err(|err| ("predict", err)),
        Err(err) => Err(("fit", err)),
    };
    let preds = match scored {
        Ok(preds) => preds,
        Err((stage, err)) => {
            let message = tolerate(err, fold.index, policy, stage)?;
            return Ok(FoldOutcome {
                fold: fold.index,
                fit_time,
                score_time: 0.0,
                test: missing_scores(scoring),
                train: score_train.then(|| missing_scores(scoring)),
                failure: Some(message),
            });
        }
    };
    let test = resolve_outcomes(scoring.score_all(&y_test, &preds), fold.index, policy)?;
    let score_time = score_start.elapsed().as_secs_f64();

    let mut failure = None;
    let train = if score_train {
        match FoldPredictions::from_pipeline(&pipeline, &x_train, scoring.needs_proba()) {
            Ok(train_preds) => Some(resolve_outcomes(
                scoring.score_all(&y_train, &train_preds),
                fold.index,
                policy,
            )?),
            Err(err) => {
                failure = Some(tolerate(err, fold.index, policy, "train predict")?);
                Some(missing_scores(scoring))
            }
        }
    } else {
        None
    };

    log::trace!(
        "Fold {}: {} train rows, {} test rows, fit {:.4}s, score {:.4}s",
        fold.index,
        fold.train.len(),
        fold.test.len(),
        fit_time,
        score_time
    );

    Ok(FoldOutcome {
        fold: fold.index,
        fit_time,
        score_time,
        test,
        train,
        failure,
    })
}

fn evaluate_folds(
    pipeline: &Pipeline,
    x: &Array2<f64>,
    y: &Array1<usize>,
    folds: &[Fold],
    scoring: &ScoringSet,
    policy: FoldPolicy,
) -> Result<RawResultSet> {
    let outcomes = folds
        .par_iter()
        .map(|fold| run_fold(pipeline, x, y, fold, scoring, false, policy))
        .collect::<Result<Vec<_>>>()?;
    Ok(RawResultSet::from_outcomes(&scoring.kinds(), &outcomes))
}

/// Evaluate one pipeline under `cv_plan` with the full scoring set.
pub fn evaluate(
    x: &Array2<f64>,
    y: &Array1<usize>,
    cv_plan: &dyn CvPlan,
    parts: PipelineParts,
    options: &EvaluateOptions,
) -> Result<RawResultSet> {
    let pipeline = parts.assemble()?;
    let scoring = prepare_scoring(x, y, options.mode, options.beta)?;
    let folds = cv_plan.folds(y)?;
    log::debug!(
        "Evaluating {:?} on {} folds ({:?} metrics)",
        pipeline,
        folds.len(),
        options.mode
    );
    evaluate_folds(&pipeline, x, y, &folds, &scoring, options.policy)
}

/// Evaluate several named pipelines on one shared fold plan.
///
/// All pipelines are assembled before any fold runs, so a configuration error
/// in any model aborts the run without work.
pub fn evaluate_models(
    x: &Array2<f64>,
    y: &Array1<usize>,
    cv_plan: &dyn CvPlan,
    models: Vec<(String, PipelineParts)>,
    options: &EvaluateOptions,
) -> Result<BTreeMap<String, RawResultSet>> {
    if models.is_empty() {
        return Err(EvalError::config("no models to evaluate"));
    }
    let scoring = prepare_scoring(x, y, options.mode, options.beta)?;

    let mut pipelines = BTreeMap::new();
    for (name, parts) in models {
        let pipeline = parts.assemble()?;
        if pipelines.insert(name.clone(), pipeline).is_some() {
            return Err(EvalError::config(format!("duplicate model name '{}'", name)));
        }
    }

    let folds = cv_plan.folds(y)?;
    let mut results = BTreeMap::new();
    for (name, pipeline) in &pipelines {
        log::info!("Evaluating model '{}' on {} folds", name, folds.len());
        let raw = evaluate_folds(pipeline, x, y, &folds, &scoring, options.policy)?;
        if !raw.failures.is_empty() {
            log::warn!("Model '{}': {} of {} folds failed", name, raw.failures.len(), folds.len());
        }
        results.insert(name.clone(), raw);
    }
    Ok(results)
}
