mod common;

use classifier_eval::config::{ModelConfig, ModelSpec, ModelType, SamplerConfig};
use classifier_eval::cross_validation::{PredefinedSplit, StratifiedKFold};
use classifier_eval::error::EvalError;
use classifier_eval::evaluation::{evaluate, evaluate_models, EvaluateOptions, FoldPolicy};
use classifier_eval::metrics::{ClassificationMode, MetricKind};
use classifier_eval::models::factory;
use classifier_eval::pipeline::PipelineParts;
use ndarray::Array1;

use common::{balanced_binary, fit_count, three_class, ThresholdClassifier};

fn small_gbdt() -> ModelConfig {
    ModelConfig::new(
        0.3,
        ModelType::GBDT {
            max_depth: 2,
            num_boost_round: 5,
            debug: false,
            training_optimization_level: 2,
        },
    )
}

// ----
// Mode A shape
// ----

#[test]
fn test_evaluate_returns_k_values_per_metric() {
    let (x, y) = balanced_binary(40);
    let plan = StratifiedKFold::new(5, Some(42));
    let parts = PipelineParts::new(Box::new(ThresholdClassifier::new(1)));

    let raw = evaluate(&x, &y, &plan, parts, &EvaluateOptions::default()).unwrap();

    assert_eq!(raw.scores.len(), 8);
    for kind in MetricKind::ALL {
        let values = raw.metric(kind).unwrap();
        assert_eq!(values.len(), 5, "{}", kind);
        for v in values {
            let v = v.unwrap_or_else(|| panic!("{} missing", kind));
            assert!((0.0..=1.0).contains(&v), "{} = {}", kind, v);
        }
    }
    assert_eq!(raw.fit_time.len(), 5);
    assert_eq!(raw.score_time.len(), 5);
    assert!(raw.fit_time.iter().chain(&raw.score_time).all(|&t| t >= 0.0));
    assert!(raw.failures.is_empty());
}

#[test]
fn test_metric_keys_do_not_depend_on_mode() {
    let (xb, yb) = balanced_binary(30);
    let (xm, ym) = three_class(30);
    let plan = StratifiedKFold::new(3, Some(7));

    let binary = evaluate(
        &xb,
        &yb,
        &plan,
        PipelineParts::new(factory::build_model(small_gbdt())),
        &EvaluateOptions::default(),
    )
    .unwrap();
    let multi = evaluate(
        &xm,
        &ym,
        &plan,
        PipelineParts::new(factory::build_model(small_gbdt())),
        &EvaluateOptions {
            mode: ClassificationMode::Multiclass,
            ..Default::default()
        },
    )
    .unwrap();

    let binary_keys: Vec<_> = binary.scores.keys().collect();
    let multi_keys: Vec<_> = multi.scores.keys().collect();
    assert_eq!(binary_keys, multi_keys);
    assert_eq!(multi.n_folds(), 3);
}

// ----
// Degenerate folds
// ----

/// Every test partition holds a single class.
fn single_class_folds() -> PredefinedSplit {
    PredefinedSplit::new(vec![
        (vec![1, 3, 4, 5, 6, 7], vec![0, 2]),
        (vec![0, 2, 4, 5, 6, 7], vec![1, 3]),
    ])
}

#[test]
fn test_undefined_metric_is_missing_when_lenient() {
    let (x, y) = balanced_binary(8);
    let raw = evaluate(
        &x,
        &y,
        &single_class_folds(),
        PipelineParts::new(Box::new(ThresholdClassifier::new(1))),
        &EvaluateOptions::default(),
    )
    .unwrap();

    assert_eq!(raw.metric(MetricKind::RocAuc).unwrap(), &[None, None]);
    assert!(raw.metric(MetricKind::Accuracy).unwrap().iter().all(Option::is_some));
    // A fold without positives has no average precision.
    assert_eq!(raw.metric(MetricKind::AveragePrecision).unwrap()[0], None);
    assert!(raw.failures.is_empty());
}

#[test]
fn test_undefined_metric_aborts_when_strict() {
    let (x, y) = balanced_binary(8);
    let options = EvaluateOptions {
        policy: FoldPolicy::Strict,
        ..Default::default()
    };
    let err = evaluate(
        &x,
        &y,
        &single_class_folds(),
        PipelineParts::new(Box::new(ThresholdClassifier::new(1))),
        &options,
    )
    .unwrap_err();
    assert!(matches!(err, EvalError::UndefinedMetric { .. }), "{:?}", err);
}

#[test]
fn test_single_class_training_fold_leaves_ranking_metrics_missing() {
    let (x, y) = balanced_binary(8);
    // Fold 0 trains on class 0 only; both test partitions hold both classes.
    let plan = PredefinedSplit::new(vec![
        (vec![0, 2, 4], vec![5, 6, 7]),
        (vec![0, 1, 2, 3, 4], vec![5, 6, 7]),
    ]);

    let raw = evaluate(
        &x,
        &y,
        &plan,
        PipelineParts::new(Box::new(ThresholdClassifier::new(1))),
        &EvaluateOptions::default(),
    )
    .unwrap();

    assert!(raw.failures.is_empty());
    for kind in [MetricKind::RocAuc, MetricKind::AveragePrecision] {
        let values = raw.metric(kind).unwrap();
        assert_eq!(values[0], None, "{}", kind);
        assert!(values[1].is_some(), "{}", kind);
    }
    for kind in MetricKind::ALL.iter().filter(|k| !k.needs_proba()) {
        assert!(raw.metric(*kind).unwrap()[0].is_some(), "{}", kind);
    }
    // Everything is predicted as class 0.
    assert!((raw.metric(MetricKind::Accuracy).unwrap()[0].unwrap() - 1.0 / 3.0).abs() < 1e-12);
    assert_eq!(raw.metric(MetricKind::Recall).unwrap()[0], Some(0.0));

    let err = evaluate(
        &x,
        &y,
        &plan,
        PipelineParts::new(Box::new(ThresholdClassifier::new(1))),
        &EvaluateOptions {
            policy: FoldPolicy::Strict,
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, EvalError::UndefinedMetric { fold: 0, .. }), "{:?}", err);
}

#[test]
fn test_failing_fold_is_recorded_or_fatal() {
    let (x, y) = balanced_binary(8);
    let plan = PredefinedSplit::new(vec![
        (vec![2, 3, 4, 5, 6, 7], vec![0, 1]),
        (vec![0, 1, 2, 3, 4], vec![5, 6, 7]),
    ]);
    let mut clf = ThresholdClassifier::new(1);
    clf.fail_on_rows = Some(5);

    let raw = evaluate(
        &x,
        &y,
        &plan,
        PipelineParts::new(Box::new(clf.clone())),
        &EvaluateOptions::default(),
    )
    .unwrap();
    assert_eq!(raw.failures.len(), 1);
    assert_eq!(raw.failures[0].fold, 1);
    for kind in MetricKind::ALL {
        let values = raw.metric(kind).unwrap();
        assert!(values[0].is_some(), "{}", kind);
        assert_eq!(values[1], None, "{}", kind);
    }

    let strict = EvaluateOptions {
        policy: FoldPolicy::Strict,
        ..Default::default()
    };
    let err = evaluate(&x, &y, &plan, PipelineParts::new(Box::new(clf)), &strict).unwrap_err();
    assert!(matches!(err, EvalError::Fold { fold: 1, .. }), "{:?}", err);
}

// ----
// Configuration errors
// ----

#[test]
fn test_config_errors_run_no_folds() {
    let (x, _) = balanced_binary(9);
    let y = Array1::from_iter((0..9).map(|i| i % 3));
    let clf = ThresholdClassifier::new(1);
    let counter = clf.counter();

    let err = evaluate(
        &x,
        &y,
        &StratifiedKFold::new(3, Some(1)),
        PipelineParts::new(Box::new(clf)),
        &EvaluateOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, EvalError::Config(_)));
    assert_eq!(fit_count(&counter), 0);

    let err = evaluate(
        &x,
        &y,
        &StratifiedKFold::new(3, Some(1)),
        PipelineParts::default(),
        &EvaluateOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, EvalError::Config(_)));

    let (xb, yb) = balanced_binary(10);
    let bad_beta = EvaluateOptions {
        beta: -1.0,
        ..Default::default()
    };
    assert!(matches!(
        evaluate(
            &xb,
            &yb,
            &StratifiedKFold::new(2, None),
            PipelineParts::new(Box::new(ThresholdClassifier::new(1))),
            &bad_beta
        ),
        Err(EvalError::Config(_))
    ));
}

// ----
// Several models
// ----

#[test]
fn test_evaluate_models_share_one_fold_plan() {
    let (x, y) = balanced_binary(30);
    let plan = StratifiedKFold::new(5, Some(3));
    let models = vec![
        ("noise".to_string(), PipelineParts::new(Box::new(ThresholdClassifier::new(2)))),
        ("signal".to_string(), PipelineParts::new(Box::new(ThresholdClassifier::new(1)))),
    ];

    let results = evaluate_models(&x, &y, &plan, models, &EvaluateOptions::default()).unwrap();
    assert_eq!(results.keys().collect::<Vec<_>>(), vec!["noise", "signal"]);
    assert!(results.values().all(|raw| raw.n_folds() == 5));
    assert!(results["signal"]
        .metric(MetricKind::Accuracy)
        .unwrap()
        .iter()
        .all(|v| *v == Some(1.0)));

    let duplicate = vec![
        ("a".to_string(), PipelineParts::new(Box::new(ThresholdClassifier::new(1)))),
        ("a".to_string(), PipelineParts::new(Box::new(ThresholdClassifier::new(2)))),
    ];
    assert!(matches!(
        evaluate_models(&x, &y, &plan, duplicate, &EvaluateOptions::default()),
        Err(EvalError::Config(_))
    ));
}

#[test]
fn test_configured_gbdt_pipeline_evaluates_end_to_end() {
    let (x, y) = balanced_binary(30);
    let spec = ModelSpec {
        name: "gbdt_full".to_string(),
        model: small_gbdt(),
        scale: true,
        select_k_best: Some(1),
        sampler: Some(SamplerConfig::RandomUnder { seed: 5 }),
    };
    let raw = evaluate(
        &x,
        &y,
        &StratifiedKFold::new(3, Some(11)),
        spec.build_parts(),
        &EvaluateOptions::default(),
    )
    .unwrap();
    assert_eq!(raw.n_folds(), 3);
    assert!(raw.failures.is_empty());
    assert!(raw.metric(MetricKind::Accuracy).unwrap().iter().all(Option::is_some));
}
