use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command, ValueHint};
use log::LevelFilter;
use std::path::PathBuf;
use std::str::FromStr;

use classifier_eval::config::{load_run_config, ProjectPaths, RunConfig};
use classifier_eval::evaluation::evaluate_models;
use classifier_eval::io::{read_dataset_with_config, Dataset, DatasetReaderConfig};
use classifier_eval::metrics::MetricKind;
use classifier_eval::models::factory;
use classifier_eval::models::params::format_params;
use classifier_eval::models::Transformer;
use classifier_eval::normalize::{normalize, NormalizedTable};
use classifier_eval::preprocessing::StandardScaler;
use classifier_eval::search::search;

fn run_args(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(
            Arg::new("config")
                .help("Path to the JSON run configuration")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("data")
                .short('d')
                .long("data")
                .help("Path to the CSV dataset")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("target")
                .short('t')
                .long("target")
                .help("Name of the label column")
                .default_value("target")
                .value_parser(clap::builder::NonEmptyStringValueParser::new()),
        )
        .arg(
            Arg::new("output_file")
                .short('o')
                .long("output")
                .help("Path to write the normalized results table (CSV). Defaults to stdout.")
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("project")
                .long("project")
                .help("Project root; the table is written to <project>/reports when --output is not given.")
                .value_parser(clap::value_parser!(PathBuf))
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .help("Abort on the first failing fold instead of recording missing values.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("multi_class")
                .long("multi-class")
                .help("Use support-weighted multi-class metrics.")
                .action(ArgAction::SetTrue),
        )
}

fn main() -> Result<()> {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("CLASSIFIER_EVAL_LOG", "error,classifier_eval=info"))
        .init();

    let matches = Command::new("classifier-eval")
        .version(clap::crate_version!())
        .author("Justin Sing <justincsing@gmail.com>")
        .about("Cross-validated evaluation and grid search for classification pipelines")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(run_args(
            "evaluate",
            "Evaluate every model in the configuration with the fixed scoring set",
        ))
        .subcommand(
            run_args("search", "Grid-search the configured model and refit the best candidate").arg(
                Arg::new("refit_metric")
                    .long("refit-metric")
                    .help("Override the metric that selects the winning candidate.")
                    .value_parser(MetricKind::ALL.map(|k| k.as_str()))
                    .value_hint(ValueHint::Other),
            ),
        )
        .get_matches();

    let outcome = match matches.subcommand() {
        Some(("evaluate", sub_m)) => handle_evaluate(sub_m),
        Some(("search", sub_m)) => handle_search(sub_m),
        _ => unreachable!("Subcommand is required by CLI configuration"),
    };
    if let Err(e) = outcome {
        log::error!("Run failed: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn load_inputs(matches: &ArgMatches) -> Result<(RunConfig, Dataset)> {
    let config_path: &PathBuf = matches
        .get_one("config")
        .ok_or_else(|| anyhow!("missing configuration path"))?;
    let data_path: &PathBuf = matches
        .get_one("data")
        .ok_or_else(|| anyhow!("missing dataset path"))?;

    log::info!("[classifier-eval] Using config: {:?}", config_path);
    let mut config = load_run_config(config_path)?;
    if matches.get_flag("strict") {
        config.strict = true;
    }
    if matches.get_flag("multi_class") {
        config.multi_class = true;
    }

    let reader_config = DatasetReaderConfig {
        target_column: matches
            .get_one::<String>("target")
            .cloned()
            .unwrap_or_else(|| "target".to_string()),
        ..Default::default()
    };
    let data = read_dataset_with_config(data_path, &reader_config)?;
    Ok((config, data))
}

fn write_table(matches: &ArgMatches, normalized: &NormalizedTable, stem: &str) -> Result<()> {
    for skipped in normalized.skipped() {
        log::debug!("Column '{}' kept as text: {:?}", skipped.column, skipped.outcome);
    }

    let output = match (
        matches.get_one::<PathBuf>("output_file"),
        matches.get_one::<PathBuf>("project"),
    ) {
        (Some(path), _) => Some(path.clone()),
        (None, Some(root)) => {
            let paths = ProjectPaths::new(root);
            std::fs::create_dir_all(&paths.reports)
                .with_context(|| format!("Failed to create {}", paths.reports.display()))?;
            Some(paths.results_table(stem))
        }
        (None, None) => None,
    };

    match output {
        Some(path) => {
            normalized
                .table
                .write_csv_file(&path)
                .with_context(|| format!("Failed to write results table: {}", path.display()))?;
            log::info!(
                "[classifier-eval] Wrote {} rows to {}",
                normalized.table.n_rows(),
                path.display()
            );
        }
        None => normalized
            .table
            .write_csv(std::io::stdout())
            .context("Failed to write results table to stdout")?,
    }
    Ok(())
}

fn handle_evaluate(matches: &ArgMatches) -> Result<()> {
    let (config, data) = load_inputs(matches)?;
    if config.models.is_empty() {
        return Err(anyhow!("The configuration lists no models to evaluate"));
    }

    let cv_plan = config.cv.build();
    let models = config
        .models
        .iter()
        .map(|spec| (spec.name.clone(), spec.build_parts()))
        .collect();
    let results = evaluate_models(&data.x, &data.y, cv_plan.as_ref(), models, &config.evaluate_options())?;

    let normalized = normalize(&results)?;
    write_table(matches, &normalized, "cv_results")
}

fn handle_search(matches: &ArgMatches) -> Result<()> {
    let (mut config, data) = load_inputs(matches)?;
    if let Some(metric) = matches.get_one::<String>("refit_metric") {
        config.refit_metric = MetricKind::from_str(metric)?;
    }
    let search_config = config
        .search
        .clone()
        .ok_or_else(|| anyhow!("The configuration has no 'search' section"))?;

    let estimator = factory::build_model(search_config.model.clone());
    let preprocessor: Option<Box<dyn Transformer>> = if search_config.scale {
        Some(Box::new(StandardScaler::new()))
    } else {
        None
    };
    let cv_plan = config.cv.build();
    let fitted = search(
        &data.x,
        &data.y,
        estimator,
        &search_config.param_grid,
        cv_plan.as_ref(),
        preprocessor,
        &config.search_options(),
    )?;

    for candidate in &fitted.cv_results {
        log::info!(
            "[classifier-eval] {} ({}): mean {} = {:.4}, rank {}",
            fitted.candidate_label(candidate.index),
            format_params(&candidate.params),
            fitted.refit_metric,
            candidate.mean_test.get(&fitted.refit_metric).copied().unwrap_or(f64::NAN),
            candidate.rank_test.get(&fitted.refit_metric).copied().unwrap_or(0)
        );
    }
    log::info!(
        "[classifier-eval] Best: {} ({}) with {} = {:.4}, refit in {:.3}s",
        fitted.candidate_label(fitted.best_index),
        format_params(&fitted.best_params),
        fitted.refit_metric,
        fitted.best_score,
        fitted.refit_time
    );

    let normalized = normalize(&fitted.raw_results())?;
    write_table(matches, &normalized, "search_results")
}
