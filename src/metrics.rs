//! The fixed scoring set.
//!
//! Metrics are a closed enum. String names only appear at the boundary
//! (table columns, JSON config). The binary/multi-class choice is made once,
//! when a [`ScoringSet`] is built, and every scorer carries it.
//!
//! Degenerate inputs follow two rules:
//! * precision, recall and F-beta with a zero denominator score `0.0`;
//! * ranking metrics (ROC-AUC, average precision) on a partition that lacks a
//!   class are *undefined* and return `Err`.
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};
use crate::pipeline::Pipeline;

/// Canonical metric keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Accuracy,
    BalancedAccuracy,
    F1,
    Precision,
    Recall,
    RocAuc,
    AveragePrecision,
    F2Score,
}

impl MetricKind {
    pub const ALL: [MetricKind; 8] = [
        MetricKind::Accuracy,
        MetricKind::BalancedAccuracy,
        MetricKind::F1,
        MetricKind::Precision,
        MetricKind::Recall,
        MetricKind::RocAuc,
        MetricKind::AveragePrecision,
        MetricKind::F2Score,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Accuracy => "accuracy",
            MetricKind::BalancedAccuracy => "balanced_accuracy",
            MetricKind::F1 => "f1",
            MetricKind::Precision => "precision",
            MetricKind::Recall => "recall",
            MetricKind::RocAuc => "roc_auc",
            MetricKind::AveragePrecision => "average_precision",
            MetricKind::F2Score => "f2_score",
        }
    }

    /// Whether the metric ranks probabilities rather than comparing labels.
    pub fn needs_proba(&self) -> bool {
        matches!(self, MetricKind::RocAuc | MetricKind::AveragePrecision)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = EvalError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let name = s.to_lowercase();
        MetricKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| {
                EvalError::config(format!(
                    "Unknown metric: {}. Valid options are: {}",
                    s,
                    MetricKind::ALL.map(|k| k.as_str()).join(", ")
                ))
            })
    }
}

/// Which metric variants the scoring set uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMode {
    /// Labels are `{0, 1}`; `1` is the positive class.
    #[default]
    Binary,
    /// Label metrics are averaged with weights equal to class support;
    /// ranking metrics are one-vs-rest and averaged without weights.
    Multiclass,
}

impl ClassificationMode {
    pub fn from_multi_class(multi_class: bool) -> Self {
        if multi_class {
            ClassificationMode::Multiclass
        } else {
            ClassificationMode::Binary
        }
    }

    /// Reject label sets the mode cannot score.
    pub fn validate_labels(&self, y: &Array1<usize>) -> Result<()> {
        if *self == ClassificationMode::Binary {
            if let Some(bad) = y.iter().find(|&&label| label > 1) {
                return Err(EvalError::config(format!(
                    "binary metric mode requires labels in {{0, 1}}, found class {}; use multi-class mode",
                    bad
                )));
            }
        }
        Ok(())
    }
}

/// Result of scoring one metric on one fold. `Err` carries why it is undefined.
pub type MetricOutcome = std::result::Result<f64, String>;

/// Predictions for a held-out partition, computed once and shared by every scorer.
#[derive(Debug, Clone)]
pub struct FoldPredictions {
    pub labels: Array1<usize>,
    /// Columns follow `classes`.
    pub proba: Option<Array2<f64>>,
    pub classes: Vec<usize>,
}

impl FoldPredictions {
    /// Predict with a fitted pipeline. Probabilities are only requested when `with_proba`.
    pub fn from_pipeline(pipeline: &Pipeline, x: &Array2<f64>, with_proba: bool) -> Result<Self> {
        let labels = pipeline.predict(x)?;
        let proba = if with_proba {
            Some(pipeline.predict_proba(x)?)
        } else {
            None
        };
        Ok(FoldPredictions {
            labels,
            proba,
            classes: pipeline.classes().to_vec(),
        })
    }

    fn class_scores(&self, class: usize) -> std::result::Result<Vec<f64>, String> {
        let proba = self
            .proba
            .as_ref()
            .ok_or_else(|| "probabilities were not computed".to_string())?;
        let col = self
            .classes
            .iter()
            .position(|&c| c == class)
            .ok_or_else(|| format!("estimator was not fitted on class {}", class))?;
        Ok(proba.column(col).to_vec())
    }
}

/// One metric bound to the run's mode and beta.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scorer {
    pub kind: MetricKind,
    pub mode: ClassificationMode,
    pub beta: f64,
}

impl Scorer {
    /// Score a fitted pipeline on `(x, y)`.
    pub fn score(&self, pipeline: &Pipeline, x: &Array2<f64>, y: &Array1<usize>) -> Result<MetricOutcome> {
        let preds = FoldPredictions::from_pipeline(pipeline, x, self.kind.needs_proba())?;
        Ok(self.score_predictions(y, &preds))
    }

    pub fn score_predictions(&self, y_true: &Array1<usize>, preds: &FoldPredictions) -> MetricOutcome {
        let truth = y_true.to_vec();
        let pred = preds.labels.to_vec();
        if truth.len() != pred.len() {
            return Err(format!(
                "{} labels but {} predictions",
                truth.len(),
                pred.len()
            ));
        }
        if truth.is_empty() {
            return Err("empty partition".to_string());
        }

        match (self.kind, self.mode) {
            (MetricKind::Accuracy, _) => Ok(accuracy(&truth, &pred)),
            (MetricKind::BalancedAccuracy, _) => Ok(balanced_accuracy(&truth, &pred)),
            (MetricKind::Precision, ClassificationMode::Binary) => {
                Ok(ConfusionCounts::binary(&truth, &pred).precision())
            }
            (MetricKind::Recall, ClassificationMode::Binary) => {
                Ok(ConfusionCounts::binary(&truth, &pred).recall())
            }
            (MetricKind::F1, ClassificationMode::Binary) => {
                Ok(ConfusionCounts::binary(&truth, &pred).fbeta(1.0))
            }
            (MetricKind::F2Score, ClassificationMode::Binary) => {
                Ok(ConfusionCounts::binary(&truth, &pred).fbeta(self.beta))
            }
            (MetricKind::Precision, ClassificationMode::Multiclass) => {
                Ok(weighted(&truth, &pred, |c| c.precision()))
            }
            (MetricKind::Recall, ClassificationMode::Multiclass) => {
                Ok(weighted(&truth, &pred, |c| c.recall()))
            }
            (MetricKind::F1, ClassificationMode::Multiclass) => {
                Ok(weighted(&truth, &pred, |c| c.fbeta(1.0)))
            }
            (MetricKind::F2Score, ClassificationMode::Multiclass) => {
                let beta = self.beta;
                Ok(weighted(&truth, &pred, move |c| c.fbeta(beta)))
            }
            (MetricKind::RocAuc, ClassificationMode::Binary) => {
                let scores = preds.class_scores(1)?;
                roc_auc(&positives(&truth, 1), &scores)
            }
            (MetricKind::AveragePrecision, ClassificationMode::Binary) => {
                let scores = preds.class_scores(1)?;
                average_precision(&positives(&truth, 1), &scores)
            }
            (MetricKind::RocAuc, ClassificationMode::Multiclass) => {
                if support(&truth).len() < 2 {
                    return Err("only one class present in y_true".to_string());
                }
                one_vs_rest_macro(&truth, preds, roc_auc)
            }
            (MetricKind::AveragePrecision, ClassificationMode::Multiclass) => {
                one_vs_rest_macro(&truth, preds, average_precision)
            }
        }
    }
}

/// All canonical metrics for one run.
#[derive(Debug, Clone)]
pub struct ScoringSet {
    scorers: Vec<Scorer>,
}

impl ScoringSet {
    pub fn new(mode: ClassificationMode, beta: f64) -> Result<Self> {
        if !beta.is_finite() || beta <= 0.0 {
            return Err(EvalError::config(format!(
                "F-beta requires a finite, positive beta, got {}",
                beta
            )));
        }
        let scorers = MetricKind::ALL
            .iter()
            .map(|&kind| Scorer { kind, mode, beta })
            .collect();
        Ok(ScoringSet { scorers })
    }

    pub fn kinds(&self) -> Vec<MetricKind> {
        self.scorers.iter().map(|s| s.kind).collect()
    }

    pub fn needs_proba(&self) -> bool {
        self.scorers.iter().any(|s| s.kind.needs_proba())
    }

    /// Score every metric from one set of cached predictions.
    pub fn score_all(&self, y_true: &Array1<usize>, preds: &FoldPredictions) -> Vec<(MetricKind, MetricOutcome)> {
        self.scorers
            .iter()
            .map(|scorer| (scorer.kind, scorer.score_predictions(y_true, preds)))
            .collect()
    }
}

/// Confusion counts for one class treated as positive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionCounts {
    pub tp: usize,
    pub fp: usize,
    pub fn_: usize,
    pub tn: usize,
}

impl ConfusionCounts {
    pub fn for_class(truth: &[usize], pred: &[usize], class: usize) -> Self {
        let mut counts = ConfusionCounts::default();
        for (&t, &p) in truth.iter().zip(pred) {
            match (t == class, p == class) {
                (true, true) => counts.tp += 1,
                (false, true) => counts.fp += 1,
                (true, false) => counts.fn_ += 1,
                (false, false) => counts.tn += 1,
            }
        }
        counts
    }

    pub fn binary(truth: &[usize], pred: &[usize]) -> Self {
        Self::for_class(truth, pred, 1)
    }

    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    /// `(1 + b^2) tp / ((1 + b^2) tp + b^2 fn + fp)`, `0.0` when the denominator is zero.
    pub fn fbeta(&self, beta: f64) -> f64 {
        let b2 = beta * beta;
        let num = (1.0 + b2) * self.tp as f64;
        let den = num + b2 * self.fn_ as f64 + self.fp as f64;
        if den == 0.0 {
            0.0
        } else {
            num / den
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Class id to number of occurrences, sorted by class.
fn support(labels: &[usize]) -> BTreeMap<usize, usize> {
    let mut counts = BTreeMap::new();
    for &label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
}

fn positives(truth: &[usize], class: usize) -> Vec<bool> {
    truth.iter().map(|&t| t == class).collect()
}

pub fn accuracy(truth: &[usize], pred: &[usize]) -> f64 {
    let correct = truth.iter().zip(pred).filter(|(t, p)| t == p).count();
    ratio(correct, truth.len())
}

/// Mean per-class recall over the classes present in `truth`.
pub fn balanced_accuracy(truth: &[usize], pred: &[usize]) -> f64 {
    let classes = support(truth);
    if classes.is_empty() {
        return 0.0;
    }
    let total: f64 = classes
        .keys()
        .map(|&c| ConfusionCounts::for_class(truth, pred, c).recall())
        .sum();
    total / classes.len() as f64
}

/// Support-weighted average of a per-class metric over the union of true and predicted labels.
fn weighted<F>(truth: &[usize], pred: &[usize], metric: F) -> f64
where
    F: Fn(&ConfusionCounts) -> f64,
{
    let true_support = support(truth);
    let mut labels: Vec<usize> = true_support.keys().copied().collect();
    labels.extend(pred.iter().copied());
    labels.sort_unstable();
    labels.dedup();

    let total: usize = true_support.values().sum();
    if total == 0 {
        return 0.0;
    }
    labels
        .iter()
        .map(|&c| {
            let w = *true_support.get(&c).unwrap_or(&0) as f64;
            w * metric(&ConfusionCounts::for_class(truth, pred, c))
        })
        .sum::<f64>()
        / total as f64
}

/// Unweighted mean of a one-vs-rest ranking metric over the classes present in `truth`.
fn one_vs_rest_macro(
    truth: &[usize],
    preds: &FoldPredictions,
    metric: fn(&[bool], &[f64]) -> MetricOutcome,
) -> MetricOutcome {
    let classes = support(truth);
    let mut acc = 0.0;
    for &class in classes.keys() {
        let scores = preds.class_scores(class)?;
        acc += metric(&positives(truth, class), &scores)?;
    }
    Ok(acc / classes.len() as f64)
}

/// Area under the ROC curve via average ranks (ties count one half).
pub fn roc_auc(truth: &[bool], scores: &[f64]) -> MetricOutcome {
    let n_pos = truth.iter().filter(|&&t| t).count();
    let n_neg = truth.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err("only one class present in y_true; ROC AUC is not defined".to_string());
    }
    if scores.iter().any(|s| s.is_nan()) {
        return Err("scores contain NaN".to_string());
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; tied block i..=j shares the average rank.
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if truth[idx] {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos_f = n_pos as f64;
    Ok((rank_sum_pos - n_pos_f * (n_pos_f + 1.0) / 2.0) / (n_pos_f * n_neg as f64))
}

/// Step-wise average precision: `sum_k (R_k - R_{k-1}) * P_k` over distinct thresholds.
pub fn average_precision(truth: &[bool], scores: &[f64]) -> MetricOutcome {
    let n_pos = truth.iter().filter(|&&t| t).count();
    if n_pos == 0 {
        return Err("no positive samples in y_true; average precision is not defined".to_string());
    }
    if scores.iter().any(|s| s.is_nan()) {
        return Err("scores contain NaN".to_string());
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));

    let (mut tp, mut fp) = (0usize, 0usize);
    let mut prev_recall = 0.0;
    let mut ap = 0.0;
    let mut i = 0;
    while i < order.len() {
        let threshold = scores[order[i]];
        while i < order.len() && scores[order[i]] == threshold {
            if truth[order[i]] {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        let recall = tp as f64 / n_pos as f64;
        let precision = tp as f64 / (tp + fp) as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    Ok(ap)
}
