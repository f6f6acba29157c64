use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use trainer_node::config::LoggingConfig;
use trainer_node::{TrainSize, DEFAULT_SEED};
use waf_common::{Exclusions, TransformerSpec};

/// Proxy node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the proxy accepts client connections on
    pub listen_addr: String,
    /// Origin server every accepted request is forwarded to
    pub upstream_addr: String,
    /// Deadline for the whole upstream exchange, in milliseconds
    pub upstream_timeout_ms: u64,
    /// Largest accepted request head
    pub max_header_bytes: usize,
    /// Largest request body read for inspection
    pub max_body_bytes: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            upstream_addr: "127.0.0.1:8000".to_string(),
            upstream_timeout_ms: 5000,
            max_header_bytes: 16 * 1024,
            max_body_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Score requests at all
    pub detection_enabled: bool,
    /// Answer anomalous requests with 403 instead of only logging them
    pub blocking_enabled: bool,
    /// Keys stripped from live requests before scoring
    pub exclusions: Exclusions,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            detection_enabled: true,
            blocking_enabled: true,
            exclusions: Exclusions::default(),
        }
    }
}

/// Where detection models come from.
///
/// A registry file written by the trainer takes precedence; otherwise the
/// proxy quick-fits one model per endpoint from `corpus_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub registry_path: Option<String>,
    pub corpus_path: Option<String>,
    pub seed: u64,
    pub train_size: TrainSize,
    pub transformers: Vec<TransformerSpec>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            registry_path: None,
            corpus_path: None,
            seed: DEFAULT_SEED,
            train_size: TrainSize::default(),
            transformers: TransformerSpec::default_table(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Prometheus scrape listener
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9191".to_string(),
        }
    }
}

impl ProxyConfig {
    /// Load configuration from file, with `WAF_PROXY__SECTION__KEY` environment overrides
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("WAF_PROXY")
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

    pub fn listen_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.network.listen_addr.parse()
    }

    pub fn upstream_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.network.upstream_addr.parse()
    }

    pub fn metrics_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.metrics.listen_addr.parse()
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.network.upstream_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.listen_addr()
            .map_err(|e| format!("Invalid listen address '{}': {e}", self.network.listen_addr))?;
        self.upstream_addr()
            .map_err(|e| format!("Invalid upstream address '{}': {e}", self.network.upstream_addr))?;
        if self.metrics.enabled {
            self.metrics_addr()
                .map_err(|e| format!("Invalid metrics address '{}': {e}", self.metrics.listen_addr))?;
        }

        if self.network.upstream_timeout_ms == 0 {
            return Err("Upstream timeout must be greater than 0".to_string());
        }
        if self.network.max_header_bytes < 256 {
            return Err("Max header bytes must be at least 256".to_string());
        }
        if self.logging.verbosity > 2 {
            return Err(format!("Verbosity must be 0, 1 or 2, got {}", self.logging.verbosity));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(format!("Unknown log format '{}'", self.logging.format));
        }
        if self.model.transformers.is_empty() {
            return Err("At least one transformer is required".to_string());
        }
        self.model.train_size.validate().map_err(|e| e.to_string())
    }
}
