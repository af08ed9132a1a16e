//! Cross-validation plans.
//!
//! A plan turns the sample set into a fixed list of train/test folds. Plans
//! that shuffle take an optional seed; with a seed the fold assignment is
//! fully deterministic.
use std::collections::BTreeMap;

use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{EvalError, Result};

/// A single train/test split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub index: usize,
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Anything that can produce folds over `y.len()` samples.
pub trait CvPlan: Send + Sync {
    fn n_splits(&self) -> usize;

    fn folds(&self, y: &Array1<usize>) -> Result<Vec<Fold>>;
}

fn rng_for(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

fn check_split_count(n_samples: usize, n_splits: usize) -> Result<()> {
    if n_splits < 2 {
        return Err(EvalError::config(format!(
            "n_splits must be at least 2, got {}",
            n_splits
        )));
    }
    if n_samples < n_splits {
        return Err(EvalError::config(format!(
            "n_samples ({}) must be >= n_splits ({})",
            n_samples, n_splits
        )));
    }
    Ok(())
}

/// Build folds from per-fold test sets; the train set is every other row.
fn folds_from_test_sets(n_samples: usize, test_sets: Vec<Vec<usize>>) -> Vec<Fold> {
    test_sets
        .into_iter()
        .enumerate()
        .map(|(index, mut test)| {
            test.sort_unstable();
            let mut in_test = vec![false; n_samples];
            for &i in &test {
                in_test[i] = true;
            }
            let train = (0..n_samples).filter(|&i| !in_test[i]).collect();
            Fold { index, train, test }
        })
        .collect()
}

/// K-Fold: contiguous blocks of (optionally shuffled) rows.
#[derive(Debug, Clone)]
pub struct KFold {
    n_splits: usize,
    /// `Some` shuffles with that seed; `None` keeps row order.
    seed: Option<u64>,
}

impl KFold {
    pub fn new(n_splits: usize, seed: Option<u64>) -> Self {
        KFold { n_splits, seed }
    }
}

impl CvPlan for KFold {
    fn n_splits(&self) -> usize {
        self.n_splits
    }

    fn folds(&self, y: &Array1<usize>) -> Result<Vec<Fold>> {
        let n_samples = y.len();
        check_split_count(n_samples, self.n_splits)?;

        let mut indices: Vec<usize> = (0..n_samples).collect();
        if self.seed.is_some() {
            indices.shuffle(&mut rng_for(self.seed));
        }

        let base = n_samples / self.n_splits;
        let remainder = n_samples % self.n_splits;
        let mut test_sets = Vec::with_capacity(self.n_splits);
        let mut current = 0;
        for fold_idx in 0..self.n_splits {
            let fold_size = if fold_idx < remainder { base + 1 } else { base };
            test_sets.push(indices[current..current + fold_size].to_vec());
            current += fold_size;
        }
        Ok(folds_from_test_sets(n_samples, test_sets))
    }
}

/// Stratified K-Fold: each class is dealt round-robin across folds.
#[derive(Debug, Clone)]
pub struct StratifiedKFold {
    n_splits: usize,
    seed: Option<u64>,
}

impl StratifiedKFold {
    pub fn new(n_splits: usize, seed: Option<u64>) -> Self {
        StratifiedKFold { n_splits, seed }
    }
}

impl CvPlan for StratifiedKFold {
    fn n_splits(&self) -> usize {
        self.n_splits
    }

    fn folds(&self, y: &Array1<usize>) -> Result<Vec<Fold>> {
        let n_samples = y.len();
        check_split_count(n_samples, self.n_splits)?;

        let mut class_indices: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (idx, &label) in y.iter().enumerate() {
            class_indices.entry(label).or_default().push(idx);
        }

        let mut rng = self.seed.map(ChaCha8Rng::seed_from_u64);
        let mut test_sets: Vec<Vec<usize>> = vec![Vec::new(); self.n_splits];
        // Continue dealing where the previous class stopped so fold sizes stay even.
        let mut next_fold = 0;
        for (class, indices) in class_indices.iter_mut() {
            if indices.len() < self.n_splits {
                log::warn!(
                    "class {} has only {} members, fewer than n_splits={}",
                    class,
                    indices.len(),
                    self.n_splits
                );
            }
            if let Some(rng) = rng.as_mut() {
                indices.shuffle(rng);
            }
            for &idx in indices.iter() {
                test_sets[next_fold].push(idx);
                next_fold = (next_fold + 1) % self.n_splits;
            }
        }
        Ok(folds_from_test_sets(n_samples, test_sets))
    }
}

/// Caller-supplied folds, validated against the sample count.
#[derive(Debug, Clone)]
pub struct PredefinedSplit {
    splits: Vec<(Vec<usize>, Vec<usize>)>,
}

impl PredefinedSplit {
    /// Each entry is `(train_indices, test_indices)`.
    pub fn new(splits: Vec<(Vec<usize>, Vec<usize>)>) -> Self {
        PredefinedSplit { splits }
    }

    /// Build from a per-row test-fold id; rows with `None` are always in training.
    pub fn from_test_fold(test_fold: &[Option<usize>]) -> Self {
        let mut by_fold: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (row, fold) in test_fold.iter().enumerate() {
            if let Some(fold) = fold {
                by_fold.entry(*fold).or_default().push(row);
            }
        }
        let splits = by_fold
            .into_values()
            .map(|test| {
                let train = (0..test_fold.len()).filter(|r| !test.contains(r)).collect();
                (train, test)
            })
            .collect();
        PredefinedSplit { splits }
    }
}

impl CvPlan for PredefinedSplit {
    fn n_splits(&self) -> usize {
        self.splits.len()
    }

    fn folds(&self, y: &Array1<usize>) -> Result<Vec<Fold>> {
        let n_samples = y.len();
        if self.splits.is_empty() {
            return Err(EvalError::config("predefined split has no folds"));
        }
        self.splits
            .iter()
            .enumerate()
            .map(|(index, (train, test))| {
                if train.is_empty() || test.is_empty() {
                    return Err(EvalError::config(format!(
                        "fold {} has an empty train or test set",
                        index
                    )));
                }
                if let Some(&bad) = train.iter().chain(test).find(|&&i| i >= n_samples) {
                    return Err(EvalError::config(format!(
                        "fold {} references row {} but there are only {} samples",
                        index, bad, n_samples
                    )));
                }
                if train.iter().any(|i| test.contains(i)) {
                    return Err(EvalError::config(format!(
                        "fold {} has rows in both train and test",
                        index
                    )));
                }
                Ok(Fold {
                    index,
                    train: train.clone(),
                    test: test.clone(),
                })
            })
            .collect()
    }
}
