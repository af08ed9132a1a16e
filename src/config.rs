use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cross_validation::{CvPlan, KFold, StratifiedKFold};
use crate::evaluation::{EvaluateOptions, FoldPolicy};
use crate::feature_selection::univariate_selection::SelectKBest;
use crate::metrics::{ClassificationMode, MetricKind};
use crate::models::factory;
use crate::pipeline::PipelineParts;
use crate::preprocessing::StandardScaler;
use crate::resampling::{RandomOverSampler, RandomUnderSampler};
use crate::search::{ParamGrid, SearchOptions};

/// Central configuration for models in the crate.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ModelConfig {
    pub learning_rate: f32,

    #[serde(flatten)]
    pub model_type: ModelType,
}

/// Supported model types and their hyper-parameters.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub enum ModelType {
    GBDT {
        max_depth: u32,
        num_boost_round: u32,
        debug: bool,
        training_optimization_level: u8,
    },
}

impl Default for ModelType {
    fn default() -> Self {
        ModelType::GBDT {
            max_depth: 6,
            num_boost_round: 50,
            debug: false,
            training_optimization_level: 2,
        }
    }
}

impl FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gbdt" => Ok(ModelType::default()),
            _ => Err(format!("Unknown model type: {}. Valid options are: gbdt", s)),
        }
    }
}

impl ModelConfig {
    pub fn new(learning_rate: f32, model_type: ModelType) -> Self {
        Self {
            learning_rate,
            model_type,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            model_type: ModelType::default(),
        }
    }
}

/// Cross-validation plan settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CvConfig {
    pub n_splits: usize,
    pub shuffle: bool,
    pub seed: u64,
    /// Preserve class proportions in every fold.
    pub stratified: bool,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            n_splits: 5,
            shuffle: true,
            seed: 42,
            stratified: true,
        }
    }
}

impl CvConfig {
    pub fn build(&self) -> Box<dyn CvPlan> {
        let seed = self.shuffle.then_some(self.seed);
        if self.stratified {
            Box::new(StratifiedKFold::new(self.n_splits, seed))
        } else {
            Box::new(KFold::new(self.n_splits, seed))
        }
    }
}

/// Resampling stage selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SamplerConfig {
    RandomUnder { seed: u64 },
    RandomOver { seed: u64 },
}

/// One named candidate pipeline for fixed evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default)]
    pub model: ModelConfig,
    /// Standardize features before the estimator.
    #[serde(default)]
    pub scale: bool,
    /// Keep the `k` features with the highest F-statistic.
    #[serde(default)]
    pub select_k_best: Option<usize>,
    #[serde(default)]
    pub sampler: Option<SamplerConfig>,
}

impl ModelSpec {
    pub fn build_parts(&self) -> PipelineParts {
        let mut parts = PipelineParts::new(factory::build_model(self.model.clone()));
        if self.scale {
            parts = parts.preprocessor(Box::new(StandardScaler::new()));
        }
        if let Some(k) = self.select_k_best {
            parts = parts.feature_selector(Box::new(SelectKBest::new(k)));
        }
        match &self.sampler {
            Some(SamplerConfig::RandomUnder { seed }) => {
                parts = parts.sampler(Box::new(RandomUnderSampler::new(*seed)));
            }
            Some(SamplerConfig::RandomOver { seed }) => {
                parts = parts.sampler(Box::new(RandomOverSampler::new(*seed)));
            }
            None => {}
        }
        parts
    }
}

/// Grid search settings. Feature selection and resampling are not searched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub scale: bool,
    pub param_grid: ParamGrid,
}

/// Parameters for a full evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub multi_class: bool,
    pub beta: f64,
    /// Abort on a failing fold instead of recording missing values.
    pub strict: bool,
    pub refit_metric: MetricKind,
    pub return_train_score: bool,
    pub cv: CvConfig,
    pub models: Vec<ModelSpec>,
    pub search: Option<SearchConfig>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            multi_class: false,
            beta: 2.0,
            strict: false,
            refit_metric: MetricKind::RocAuc,
            return_train_score: false,
            cv: CvConfig::default(),
            models: Vec::new(),
            search: None,
        }
    }
}

impl RunConfig {
    pub fn mode(&self) -> ClassificationMode {
        ClassificationMode::from_multi_class(self.multi_class)
    }

    pub fn policy(&self) -> FoldPolicy {
        if self.strict {
            FoldPolicy::Strict
        } else {
            FoldPolicy::Lenient
        }
    }

    pub fn evaluate_options(&self) -> EvaluateOptions {
        EvaluateOptions {
            mode: self.mode(),
            beta: self.beta,
            policy: self.policy(),
        }
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            refit_metric: self.refit_metric,
            mode: self.mode(),
            beta: self.beta,
            return_train_score: self.return_train_score,
            policy: self.policy(),
        }
    }
}

/// Load a run configuration from a JSON file.
pub fn load_run_config<P: AsRef<Path>>(path: P) -> Result<RunConfig> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
    let config: RunConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;
    Ok(config)
}

/// Folder layout of an analysis project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub data: PathBuf,
    pub reports: PathBuf,
    pub images: PathBuf,
    pub models: PathBuf,
}

impl ProjectPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        let reports = root.join("reports");
        Self {
            data: root.join("data"),
            images: reports.join("images"),
            models: root.join("models"),
            reports,
            root,
        }
    }

    /// Default location for a normalized results table.
    pub fn results_table(&self, stem: &str) -> PathBuf {
        self.reports.join(format!("{}.csv", stem))
    }
}
