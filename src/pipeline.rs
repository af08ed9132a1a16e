//! Pipeline assembly.
//!
//! A pipeline is an ordered chain of optional stages ending in a mandatory
//! classifier: `preprocessor -> feature_selector -> sampler -> clf`. The
//! order is fixed and absent stages are simply left out.
use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2};

use crate::error::{EvalError, Result};
use crate::models::params::{ParamSet, ParamValue};
use crate::models::{Estimator, Resampler, Transformer};

/// Separator between stage name and parameter name in routed keys.
pub const PARAM_SEPARATOR: &str = "__";

/// Stable stage identifiers, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageName {
    Preprocessor,
    FeatureSelector,
    Sampler,
    Clf,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Preprocessor => "preprocessor",
            StageName::FeatureSelector => "feature_selector",
            StageName::Sampler => "sampler",
            StageName::Clf => "clf",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = EvalError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "preprocessor" => Ok(StageName::Preprocessor),
            "feature_selector" => Ok(StageName::FeatureSelector),
            "sampler" => Ok(StageName::Sampler),
            "clf" => Ok(StageName::Clf),
            _ => Err(EvalError::config(format!(
                "Unknown stage: {}. Valid options are: preprocessor, feature_selector, sampler, clf",
                s
            ))),
        }
    }
}

/// Split a routed key into its target stage and parameter name.
/// A key without a separator targets the classifier.
pub fn route_param(key: &str) -> Result<(StageName, &str)> {
    match key.split_once(PARAM_SEPARATOR) {
        Some((stage, param)) => Ok((stage.parse()?, param)),
        None => Ok((StageName::Clf, key)),
    }
}

/// Loose stage components, before validation.
#[derive(Default)]
pub struct PipelineParts {
    pub estimator: Option<Box<dyn Estimator>>,
    pub preprocessor: Option<Box<dyn Transformer>>,
    pub feature_selector: Option<Box<dyn Transformer>>,
    pub sampler: Option<Box<dyn Resampler>>,
}

impl PipelineParts {
    pub fn new(estimator: Box<dyn Estimator>) -> Self {
        PipelineParts {
            estimator: Some(estimator),
            ..Default::default()
        }
    }

    pub fn preprocessor(mut self, stage: Box<dyn Transformer>) -> Self {
        self.preprocessor = Some(stage);
        self
    }

    pub fn feature_selector(mut self, stage: Box<dyn Transformer>) -> Self {
        self.feature_selector = Some(stage);
        self
    }

    pub fn sampler(mut self, stage: Box<dyn Resampler>) -> Self {
        self.sampler = Some(stage);
        self
    }

    pub fn assemble(self) -> Result<Pipeline> {
        assemble(
            self.estimator,
            self.preprocessor,
            self.feature_selector,
            self.sampler,
        )
    }
}

/// Build a pipeline from its stages. Fails only when the estimator is absent.
pub fn assemble(
    estimator: Option<Box<dyn Estimator>>,
    preprocessor: Option<Box<dyn Transformer>>,
    feature_selector: Option<Box<dyn Transformer>>,
    sampler: Option<Box<dyn Resampler>>,
) -> Result<Pipeline> {
    let clf = estimator.ok_or_else(|| EvalError::config("a pipeline requires an estimator"))?;
    Ok(Pipeline {
        preprocessor,
        feature_selector,
        sampler,
        clf,
    })
}

/// An ordered chain of stages ending in a classifier.
pub struct Pipeline {
    preprocessor: Option<Box<dyn Transformer>>,
    feature_selector: Option<Box<dyn Transformer>>,
    sampler: Option<Box<dyn Resampler>>,
    clf: Box<dyn Estimator>,
}

impl Pipeline {
    /// Names of the present stages, in execution order.
    pub fn stage_names(&self) -> Vec<StageName> {
        let mut names = Vec::with_capacity(4);
        if self.preprocessor.is_some() {
            names.push(StageName::Preprocessor);
        }
        if self.feature_selector.is_some() {
            names.push(StageName::FeatureSelector);
        }
        if self.sampler.is_some() {
            names.push(StageName::Sampler);
        }
        names.push(StageName::Clf);
        names
    }

    pub fn estimator(&self) -> &dyn Estimator {
        self.clf.as_ref()
    }

    /// Fit every stage in order on the training rows.
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(EvalError::DimensionMismatch(format!(
                "feature matrix has {} rows but {} labels",
                x.nrows(),
                y.len()
            )));
        }

        let mut features = x.to_owned();
        if let Some(stage) = self.preprocessor.as_mut() {
            features = stage.fit_transform(&features, y)?;
        }
        if let Some(stage) = self.feature_selector.as_mut() {
            features = stage.fit_transform(&features, y)?;
        }

        match self.sampler.as_mut() {
            Some(stage) => {
                let (xs, ys) = stage.fit_resample(&features, y)?;
                if xs.ncols() != features.ncols() {
                    return Err(EvalError::DimensionMismatch(format!(
                        "sampler '{}' changed the column count from {} to {}",
                        stage.name(),
                        features.ncols(),
                        xs.ncols()
                    )));
                }
                if xs.nrows() != ys.len() {
                    return Err(EvalError::DimensionMismatch(format!(
                        "sampler '{}' returned {} rows but {} labels",
                        stage.name(),
                        xs.nrows(),
                        ys.len()
                    )));
                }
                self.clf.fit(&xs, &ys)
            }
            None => self.clf.fit(&features, y),
        }
    }

    /// Apply the fitted transforms. The sampler does not run here.
    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let mut features = x.to_owned();
        if let Some(stage) = self.preprocessor.as_ref() {
            features = stage.transform(&features)?;
        }
        if let Some(stage) = self.feature_selector.as_ref() {
            features = stage.transform(&features)?;
        }
        Ok(features)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<usize>> {
        self.clf.predict(&self.transform(x)?)
    }

    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.clf.predict_proba(&self.transform(x)?)
    }

    pub fn classes(&self) -> &[usize] {
        self.clf.classes()
    }

    /// Set one routed parameter (`stage__param`, or a bare name for `clf`).
    pub fn set_param(&mut self, key: &str, value: &ParamValue) -> Result<()> {
        let (stage, name) = route_param(key)?;
        let missing = || EvalError::config(format!("pipeline has no '{}' stage for parameter '{}'", stage, key));
        match stage {
            StageName::Preprocessor => self.preprocessor.as_mut().ok_or_else(missing)?.set_param(name, value),
            StageName::FeatureSelector => self
                .feature_selector
                .as_mut()
                .ok_or_else(missing)?
                .set_param(name, value),
            StageName::Sampler => self.sampler.as_mut().ok_or_else(missing)?.set_param(name, value),
            StageName::Clf => self.clf.set_param(name, value),
        }
    }

    pub fn set_params(&mut self, params: &ParamSet) -> Result<()> {
        for (key, value) in params {
            self.set_param(key, value)?;
        }
        Ok(())
    }

    /// A copy with the same hyperparameters and no fitted state.
    pub fn clone_unfitted(&self) -> Pipeline {
        Pipeline {
            preprocessor: self.preprocessor.as_ref().map(|s| s.clone_unfitted()),
            feature_selector: self.feature_selector.as_ref().map(|s| s.clone_unfitted()),
            sampler: self.sampler.as_ref().map(|s| s.clone_unfitted()),
            clf: self.clf.clone_unfitted(),
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let stages: Vec<&str> = self.stage_names().iter().map(|s| s.as_str()).collect();
        f.debug_struct("Pipeline")
            .field("stages", &stages)
            .field("clf", &self.clf.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_selection::univariate_selection::SelectKBest;
    use crate::preprocessing::StandardScaler;
    use crate::resampling::RandomUnderSampler;
    use ndarray::array;

    /// Predicts the majority training class; records the width it was fitted on.
    #[derive(Clone, Default)]
    struct Majority {
        class: Option<usize>,
        width: usize,
        classes: Vec<usize>,
        bias: f64,
    }

    impl Estimator for Majority {
        fn fit(&mut self, x: &Array2<f64>, y: &Array1<usize>) -> Result<()> {
            let ones = y.iter().filter(|&&v| v == 1).count();
            self.class = Some(if ones * 2 > y.len() { 1 } else { 0 });
            self.width = x.ncols();
            self.classes = vec![0, 1];
            Ok(())
        }

        fn predict(&self, x: &Array2<f64>) -> Result<Array1<usize>> {
            let class = self.class.ok_or_else(|| EvalError::estimator("not fitted"))?;
            Ok(Array1::from_elem(x.nrows(), class))
        }

        fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
            let class = self.class.ok_or_else(|| EvalError::estimator("not fitted"))?;
            Ok(Array2::from_shape_fn((x.nrows(), 2), |(_, c)| if c == class { 1.0 } else { 0.0 }))
        }

        fn classes(&self) -> &[usize] {
            &self.classes
        }

        fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
            match name {
                "bias" => self.bias = value.as_f64(name)?,
                _ => return Err(crate::models::params::unknown_param("majority", name)),
            }
            Ok(())
        }

        fn clone_unfitted(&self) -> Box<dyn Estimator> {
            Box::new(Majority {
                bias: self.bias,
                ..Default::default()
            })
        }
    }

    fn names(p: &Pipeline) -> Vec<&'static str> {
        p.stage_names().iter().map(|s| s.as_str()).collect()
    }

    #[test]
    fn stage_order_is_fixed_for_every_subset() {
        for mask in 0..8u8 {
            let mut parts = PipelineParts::new(Box::new(Majority::default()));
            let mut expected = Vec::new();
            if mask & 1 != 0 {
                parts = parts.preprocessor(Box::new(StandardScaler::new()));
                expected.push("preprocessor");
            }
            if mask & 2 != 0 {
                parts = parts.feature_selector(Box::new(SelectKBest::new(1)));
                expected.push("feature_selector");
            }
            if mask & 4 != 0 {
                parts = parts.sampler(Box::new(RandomUnderSampler::new(0)));
                expected.push("sampler");
            }
            expected.push("clf");
            assert_eq!(names(&parts.assemble().unwrap()), expected);
        }
    }

    #[test]
    fn missing_estimator_is_a_config_error() {
        let err = assemble(None, Some(Box::new(StandardScaler::new())), None, None).unwrap_err();
        assert!(matches!(err, EvalError::Config(_)));
    }

    #[test]
    fn selector_output_reaches_the_classifier_and_sampler_skips_prediction() {
        let x = array![[1.0, 0.0, 3.0], [2.0, 1.0, 3.0], [3.0, 0.0, 3.0], [4.0, 1.0, 3.0], [5.0, 1.0, 3.0]];
        let y = array![0, 1, 0, 1, 1];
        let mut pipeline = PipelineParts::new(Box::new(Majority::default()))
            .feature_selector(Box::new(SelectKBest::new(1)))
            .sampler(Box::new(RandomUnderSampler::new(3)))
            .assemble()
            .unwrap();
        pipeline.fit(&x, &y).unwrap();

        // Prediction returns one label per input row even though the sampler dropped rows in fit.
        assert_eq!(pipeline.predict(&x).unwrap().len(), 5);
        assert_eq!(pipeline.predict_proba(&x).unwrap().dim(), (5, 2));
    }

    #[test]
    fn params_route_by_stage_prefix() {
        let mut pipeline = PipelineParts::new(Box::new(Majority::default()))
            .feature_selector(Box::new(SelectKBest::new(1)))
            .assemble()
            .unwrap();
        let mut params = ParamSet::new();
        params.insert("bias".into(), ParamValue::Float(0.5));
        params.insert("clf__bias".into(), ParamValue::Float(0.25));
        params.insert("feature_selector__k".into(), ParamValue::Int(2));
        pipeline.set_params(&params).unwrap();

        assert!(pipeline.set_param("sampler__seed", &ParamValue::Int(1)).is_err());
        assert!(pipeline.set_param("clf__depth", &ParamValue::Int(1)).is_err());
        assert!(pipeline.set_param("scaler__with_mean", &ParamValue::Bool(true)).is_err());
    }

    #[test]
    fn clone_unfitted_drops_fitted_state() {
        let x = array![[1.0], [2.0]];
        let y = array![0, 1];
        let mut pipeline = PipelineParts::new(Box::new(Majority::default()))
            .preprocessor(Box::new(StandardScaler::new()))
            .assemble()
            .unwrap();
        pipeline.fit(&x, &y).unwrap();
        let fresh = pipeline.clone_unfitted();
        assert!(fresh.predict(&x).is_err());
        assert_eq!(names(&fresh), names(&pipeline));
    }

    #[test]
    fn route_param_defaults_to_clf() {
        assert_eq!(route_param("max_depth").unwrap(), (StageName::Clf, "max_depth"));
        assert_eq!(
            route_param("preprocessor__with_std").unwrap(),
            (StageName::Preprocessor, "with_std")
        );
        assert!(route_param("bogus__x").is_err());
    }
}
