mod common;

use classifier_eval::error::EvalError;
use classifier_eval::metrics::{ClassificationMode, MetricKind, Scorer};
use classifier_eval::models::params::{ParamSet, ParamValue};
use classifier_eval::models::{Resampler, Transformer};
use classifier_eval::pipeline::{assemble, PipelineParts, StageName};
use classifier_eval::resampling::RandomOverSampler;

use common::{balanced_binary, ColumnDroppingSampler, Identity, ThresholdClassifier};
use ndarray::Axis;

// ----
// Stage order
// ----

#[test]
fn test_assemble_never_reorders_stages() {
    for mask in 0..8u8 {
        let pre: Option<Box<dyn Transformer>> = (mask & 1 != 0).then(|| Box::new(Identity) as Box<dyn Transformer>);
        let sel: Option<Box<dyn Transformer>> = (mask & 2 != 0).then(|| Box::new(Identity) as Box<dyn Transformer>);
        let smp: Option<Box<dyn Resampler>> = (mask & 4 != 0).then(|| Box::new(RandomOverSampler::new(1)) as Box<dyn Resampler>);

        let pipeline = assemble(Some(Box::new(ThresholdClassifier::new(1))), pre, sel, smp).unwrap();
        let names = pipeline.stage_names();

        let mut expected = Vec::new();
        if mask & 1 != 0 {
            expected.push(StageName::Preprocessor);
        }
        if mask & 2 != 0 {
            expected.push(StageName::FeatureSelector);
        }
        if mask & 4 != 0 {
            expected.push(StageName::Sampler);
        }
        expected.push(StageName::Clf);
        assert_eq!(names, expected, "mask {:03b}", mask);
    }
}

#[test]
fn test_assemble_requires_estimator() {
    let err = assemble(None, None, None, None).unwrap_err();
    assert!(matches!(err, EvalError::Config(_)));

    let err = PipelineParts::default()
        .preprocessor(Box::new(Identity))
        .assemble()
        .unwrap_err();
    assert!(matches!(err, EvalError::Config(_)));
}

// ----
// Fit / predict
// ----

#[test]
fn test_pipeline_fit_predict_round() {
    let (x, y) = balanced_binary(20);
    let mut pipeline = PipelineParts::new(Box::new(ThresholdClassifier::new(1)))
        .preprocessor(Box::new(Identity))
        .sampler(Box::new(RandomOverSampler::new(4)))
        .assemble()
        .unwrap();
    pipeline.fit(&x, &y).unwrap();

    assert_eq!(pipeline.classes(), &[0, 1]);
    let predictions = pipeline.predict(&x).unwrap();
    assert_eq!(predictions, y);
    assert_eq!(pipeline.predict_proba(&x).unwrap().dim(), (20, 2));
}

#[test]
fn test_sampler_may_not_change_columns() {
    let (x, y) = balanced_binary(10);
    let mut pipeline = PipelineParts::new(Box::new(ThresholdClassifier::new(1)))
        .sampler(Box::new(ColumnDroppingSampler))
        .assemble()
        .unwrap();
    assert!(matches!(pipeline.fit(&x, &y), Err(EvalError::DimensionMismatch(_))));
}

#[test]
fn test_set_params_routes_to_stages() {
    let mut pipeline = PipelineParts::new(Box::new(ThresholdClassifier::new(1)))
        .sampler(Box::new(RandomOverSampler::new(4)))
        .assemble()
        .unwrap();

    let mut params = ParamSet::new();
    params.insert("depth".into(), ParamValue::Int(2));
    params.insert("sampler__seed".into(), ParamValue::Int(9));
    pipeline.set_params(&params).unwrap();

    // No preprocessor in this pipeline.
    assert!(pipeline
        .set_param("preprocessor__with_mean", &ParamValue::Bool(false))
        .is_err());
    // Identity has no parameters at all.
    let mut with_identity = PipelineParts::new(Box::new(ThresholdClassifier::new(1)))
        .preprocessor(Box::new(Identity))
        .assemble()
        .unwrap();
    assert!(with_identity
        .set_param("preprocessor__anything", &ParamValue::Int(1))
        .is_err());
}

// ----
// Scoring a fitted pipeline
// ----

#[test]
fn test_scorer_scores_a_fitted_pipeline() {
    let (x, y) = balanced_binary(20);
    let mut pipeline = PipelineParts::new(Box::new(ThresholdClassifier::new(1)))
        .preprocessor(Box::new(Identity))
        .assemble()
        .unwrap();
    pipeline.fit(&x, &y).unwrap();

    let scorer = |kind| Scorer {
        kind,
        mode: ClassificationMode::Binary,
        beta: 2.0,
    };
    for kind in [MetricKind::Accuracy, MetricKind::F1, MetricKind::RocAuc] {
        let value = scorer(kind).score(&pipeline, &x, &y).unwrap();
        assert_eq!(value, Ok(1.0), "{}", kind);
    }

    // Only negatives: ROC AUC is undefined but label metrics still score.
    let negatives: Vec<usize> = (0..20).step_by(2).collect();
    let (xn, yn) = (x.select(Axis(0), &negatives), y.select(Axis(0), &negatives));
    assert!(scorer(MetricKind::RocAuc).score(&pipeline, &xn, &yn).unwrap().is_err());
    assert_eq!(scorer(MetricKind::Accuracy).score(&pipeline, &xn, &yn).unwrap(), Ok(1.0));
}
