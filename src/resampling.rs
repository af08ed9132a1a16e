//! Seeded class-balancing resamplers for the `sampler` pipeline stage.
//!
//! Both samplers balance every class to the same count and only run on
//! training rows; the column schema is never changed.
use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{EvalError, Result};
use crate::models::params::{unknown_param, ParamValue};
use crate::models::stage_traits::Resampler;

fn rows_by_class(y: &Array1<usize>) -> BTreeMap<usize, Vec<usize>> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (idx, &label) in y.iter().enumerate() {
        groups.entry(label).or_default().push(idx);
    }
    groups
}

fn take_rows(x: &Array2<f64>, y: &Array1<usize>, rows: &[usize]) -> (Array2<f64>, Array1<usize>) {
    (x.select(Axis(0), rows), y.select(Axis(0), rows))
}

fn check_input(x: &Array2<f64>, y: &Array1<usize>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(EvalError::DimensionMismatch(format!(
            "feature matrix has {} rows but {} labels",
            x.nrows(),
            y.len()
        )));
    }
    if y.is_empty() {
        return Err(EvalError::estimator("cannot resample an empty partition"));
    }
    Ok(())
}

/// Randomly drop rows of the larger classes down to the minority count.
#[derive(Clone, Debug)]
pub struct RandomUnderSampler {
    seed: u64,
}

impl RandomUnderSampler {
    pub fn new(seed: u64) -> Self {
        RandomUnderSampler { seed }
    }
}

impl Resampler for RandomUnderSampler {
    fn fit_resample(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<(Array2<f64>, Array1<usize>)> {
        check_input(x, y)?;
        let groups = rows_by_class(y);
        let target = groups.values().map(Vec::len).min().unwrap_or(0);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        let mut keep = Vec::with_capacity(target * groups.len());
        for rows in groups.values() {
            let mut chosen: Vec<usize> = rows.choose_multiple(&mut rng, target).copied().collect();
            chosen.sort_unstable();
            keep.extend(chosen);
        }
        log::trace!("RandomUnderSampler kept {} of {} rows", keep.len(), y.len());
        Ok(take_rows(x, y, &keep))
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "seed" => self.seed = value.as_usize(name)? as u64,
            _ => return Err(unknown_param(self.name(), name)),
        }
        Ok(())
    }

    fn clone_unfitted(&self) -> Box<dyn Resampler> {
        Box::new(self.clone())
    }

    fn name(&self) -> &str {
        "random_under_sampler"
    }
}

/// Randomly duplicate rows of the smaller classes up to the majority count.
#[derive(Clone, Debug)]
pub struct RandomOverSampler {
    seed: u64,
}

impl RandomOverSampler {
    pub fn new(seed: u64) -> Self {
        RandomOverSampler { seed }
    }
}

impl Resampler for RandomOverSampler {
    fn fit_resample(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<(Array2<f64>, Array1<usize>)> {
        check_input(x, y)?;
        let groups = rows_by_class(y);
        let target = groups.values().map(Vec::len).max().unwrap_or(0);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        let mut keep = Vec::with_capacity(target * groups.len());
        for rows in groups.values() {
            keep.extend(rows.iter().copied());
            for _ in rows.len()..target {
                keep.push(rows[rng.gen_range(0..rows.len())]);
            }
        }
        log::trace!("RandomOverSampler grew {} rows to {}", y.len(), keep.len());
        Ok(take_rows(x, y, &keep))
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "seed" => self.seed = value.as_usize(name)? as u64,
            _ => return Err(unknown_param(self.name(), name)),
        }
        Ok(())
    }

    fn clone_unfitted(&self) -> Box<dyn Resampler> {
        Box::new(self.clone())
    }

    fn name(&self) -> &str {
        "random_over_sampler"
    }
}
