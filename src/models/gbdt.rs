use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use ndarray::{Array1, Array2};

use crate::config::{ModelConfig, ModelType};
use crate::error::{EvalError, Result};
use crate::models::classifier_trait::Estimator;
use crate::models::params::{unknown_param, ParamValue};

/// Log-likelihood loss expects labels in {-1, 1} and predicts probabilities.
const LOSS: &str = "LogLikelyhood";

/// Gradient Boosting Decision Tree (GBDT) classifier.
///
/// Two classes train a single booster for the larger class id. More classes
/// train one booster per class (one-vs-rest) and normalize the scores.
pub struct GBDTClassifier {
    params: ModelConfig,
    models: Vec<GBDT>,
    classes: Vec<usize>,
}

impl GBDTClassifier {
    pub fn new(params: ModelConfig) -> Self {
        GBDTClassifier {
            params,
            models: Vec::new(),
            classes: Vec::new(),
        }
    }

    pub fn params(&self) -> &ModelConfig {
        &self.params
    }

    fn booster_config(&self, feature_size: usize) -> Config {
        let ModelType::GBDT {
            max_depth,
            num_boost_round,
            debug,
            training_optimization_level,
        } = &self.params.model_type;

        let mut config = Config::new();
        config.set_feature_size(feature_size);
        config.set_shrinkage(self.params.learning_rate);
        config.set_max_depth(*max_depth);
        config.set_iterations(*num_boost_round as usize);
        config.set_debug(*debug);
        config.set_training_optimization_level(*training_optimization_level);
        config.set_loss(LOSS);
        config
    }

    fn fit_one_vs_rest(&self, x: &Array2<f64>, y: &Array1<usize>, positive: usize) -> GBDT {
        let mut gbdt = GBDT::new(&self.booster_config(x.ncols()));

        let mut train_x = DataVec::new();
        for (row, &label) in x.outer_iter().zip(y.iter()) {
            let train_row = row.iter().map(|&v| v as f32).collect();
            let target = if label == positive { 1.0 } else { -1.0 };
            train_x.push(Data::new_training_data(train_row, 1.0, target, None));
        }

        gbdt.fit(&mut train_x);
        gbdt
    }

    fn to_data_vec(x: &Array2<f64>) -> DataVec {
        let mut test_x = DataVec::new();
        for row in x.outer_iter() {
            let test_row = row.iter().map(|&v| v as f32).collect();
            test_x.push(Data::new_training_data(test_row, 1.0, 0.0, None));
        }
        test_x
    }
}

impl Estimator for GBDTClassifier {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(EvalError::DimensionMismatch(format!(
                "feature matrix has {} rows but {} labels",
                x.nrows(),
                y.len()
            )));
        }
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(EvalError::estimator("GBDT requires a non-empty feature matrix"));
        }

        let mut classes: Vec<usize> = y.to_vec();
        classes.sort_unstable();
        classes.dedup();

        self.models = match classes.len() {
            // A single class needs no booster; probabilities are constant.
            1 => Vec::new(),
            2 => vec![self.fit_one_vs_rest(x, y, classes[1])],
            _ => classes
                .iter()
                .map(|&c| self.fit_one_vs_rest(x, y, c))
                .collect(),
        };
        log::trace!(
            "Fitted GBDT on {} rows, {} features, {} classes",
            x.nrows(),
            x.ncols(),
            classes.len()
        );
        self.classes = classes;
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<usize>> {
        let proba = self.predict_proba(x)?;
        Ok(proba
            .outer_iter()
            .map(|row| {
                let best = row
                    .iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |acc, (i, &p)| if p > acc.1 { (i, p) } else { acc })
                    .0;
                self.classes[best]
            })
            .collect())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.classes.is_empty() {
            return Err(EvalError::estimator("GBDT classifier has not been fitted"));
        }
        let n = x.nrows();
        let test_x = Self::to_data_vec(x);

        match self.classes.len() {
            1 => Ok(Array2::ones((n, 1))),
            2 => {
                let p = self.models[0].predict(&test_x);
                let mut proba = Array2::zeros((n, 2));
                for (i, &pi) in p.iter().enumerate() {
                    let pi = (pi as f64).clamp(0.0, 1.0);
                    proba[(i, 0)] = 1.0 - pi;
                    proba[(i, 1)] = pi;
                }
                Ok(proba)
            }
            k => {
                let mut proba = Array2::zeros((n, k));
                for (c, model) in self.models.iter().enumerate() {
                    for (i, &pi) in model.predict(&test_x).iter().enumerate() {
                        proba[(i, c)] = (pi as f64).clamp(0.0, 1.0);
                    }
                }
                for mut row in proba.outer_iter_mut() {
                    let total: f64 = row.sum();
                    if total > 0.0 {
                        row /= total;
                    } else {
                        row.fill(1.0 / k as f64);
                    }
                }
                Ok(proba)
            }
        }
    }

    fn classes(&self) -> &[usize] {
        &self.classes
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        if name == "learning_rate" {
            self.params.learning_rate = value.as_f64(name)? as f32;
            return Ok(());
        }
        let ModelType::GBDT {
            max_depth,
            num_boost_round,
            debug,
            training_optimization_level,
        } = &mut self.params.model_type;
        match name {
            "max_depth" => *max_depth = value.as_usize(name)? as u32,
            "num_boost_round" => *num_boost_round = value.as_usize(name)? as u32,
            "debug" => *debug = value.as_bool(name)?,
            "training_optimization_level" => {
                *training_optimization_level = value.as_usize(name)?.min(u8::MAX as usize) as u8
            }
            _ => return Err(unknown_param(self.name(), name)),
        }
        Ok(())
    }

    fn clone_unfitted(&self) -> Box<dyn Estimator> {
        Box::new(GBDTClassifier::new(self.params.clone()))
    }

    fn name(&self) -> &str {
        "gbdt"
    }
}
