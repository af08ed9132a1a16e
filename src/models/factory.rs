use crate::config::{ModelConfig, ModelType};
use crate::models::classifier_trait::Estimator;

/// Build a boxed estimator from a `ModelConfig`.
/// Currently this is a thin factory implemented as a single function.
pub fn build_model(params: ModelConfig) -> Box<dyn Estimator> {
    match params.model_type {
        ModelType::GBDT { .. } => Box::new(crate::models::gbdt::GBDTClassifier::new(params)),
    }
}
