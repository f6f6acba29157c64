use crate::selector::{Grid, DEFAULT_SEED};
use crate::split::TrainSize;
use serde::{Deserialize, Serialize};
use waf_common::{EndpointSignature, Exclusions, TransformerSpec};

/// Trainer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainerConfig {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// JSON corpus snapshot
    pub path: String,
    /// `"METHOD URL"` signatures to train; empty trains every endpoint
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<String>,
    /// Keys stripped from corpus samples before feature extraction
    pub exclusions: Exclusions,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: "corpus.json".to_string(),
            endpoints: Vec::new(),
            exclusions: Exclusions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub registry_path: String,
    /// Selection report; skipped when unset
    pub report_path: Option<String>,
    /// Evaluation cache reused across runs; in-memory only when unset
    pub cache_dir: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            registry_path: "registry.json".to_string(),
            report_path: Some("selection-report.json".to_string()),
            cache_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub seed: u64,
    pub train_size: TrainSize,
    pub grid: Grid,
    /// Fit once with the quick-fit hyperparameters instead of searching
    pub quick_fit: bool,
    pub transformers: Vec<TransformerSpec>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            train_size: TrainSize::default(),
            grid: Grid::default(),
            quick_fit: false,
            transformers: TransformerSpec::default_table(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 0 = silent, 1 = lifecycle, 2 = detail
    pub verbosity: u8,
    /// "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            verbosity: 1,
            format: "pretty".to_string(),
        }
    }
}

impl TrainerConfig {
    /// Load configuration from file, with `WAF_TRAINER__SECTION__KEY` environment overrides
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("WAF_TRAINER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    pub fn save_to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.corpus.path.is_empty() {
            return Err("Corpus path cannot be empty".to_string());
        }
        if self.output.registry_path.is_empty() {
            return Err("Registry output path cannot be empty".to_string());
        }
        if self.logging.verbosity > 2 {
            return Err(format!("Verbosity must be 0, 1 or 2, got {}", self.logging.verbosity));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(format!("Unknown log format '{}'", self.logging.format));
        }
        if self.training.transformers.is_empty() {
            return Err("At least one transformer is required".to_string());
        }
        if self
            .training
            .transformers
            .iter()
            .any(|spec| !spec.source.is_per_field() || !spec.family.is_numeric())
        {
            return Err("Trainer transformers must be numeric per-field entries".to_string());
        }
        self.training.train_size.validate().map_err(|e| e.to_string())?;
        self.training.grid.validate().map_err(|e| e.to_string())?;
        self.endpoints().map(|_| ())
    }

    /// Parsed endpoint selection
    pub fn endpoints(&self) -> Result<Vec<EndpointSignature>, String> {
        self.corpus
            .endpoints
            .iter()
            .map(|s| s.parse().map_err(|e: waf_common::WafError| e.to_string()))
            .collect()
    }
}
