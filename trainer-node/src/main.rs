use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trainer_node::config::LoggingConfig;
use trainer_node::{
    build_registry, quick_fit, EvaluationMemo, FeatureCache, JsonCorpus, SelectionReport, Selector,
    TrainerConfig, QUICK_FIT,
};
use waf_common::Canonicalizer;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("WAF_TRAINER_CONFIG").ok())
        .unwrap_or_else(|| "config/trainer.toml".to_string());

    let config = if std::path::Path::new(&config_path).exists() {
        TrainerConfig::from_file(&config_path)
            .with_context(|| format!("Failed to load configuration from {config_path}"))?
    } else {
        TrainerConfig::default()
    };

    init_logging(&config.logging);
    info!(config = %config_path, "Starting trainer node");

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;
    let endpoints = config
        .endpoints()
        .map_err(|e| anyhow::anyhow!("Invalid endpoint selection: {e}"))?;

    let canonicalizer = Canonicalizer::new(&config.corpus.exclusions);
    let corpus = JsonCorpus::from_file(&config.corpus.path, &canonicalizer)
        .with_context(|| format!("Failed to load corpus from {}", config.corpus.path))?
        .with_endpoints(&endpoints);
    if corpus.dropped() > 0 {
        warn!(dropped = corpus.dropped(), "Some corpus samples were malformed");
    }

    let training = &config.training;
    let registry = if training.quick_fit {
        info!(nu = QUICK_FIT.nu, gamma = QUICK_FIT.gamma, "Running quick fit");
        quick_fit(
            &corpus,
            &training.transformers,
            QUICK_FIT,
            training.train_size,
            training.seed,
        )
        .context("Quick fit failed")?
    } else {
        let cache = Arc::new(FeatureCache::build(
            &corpus,
            &training.transformers,
            training.train_size,
            training.seed,
        ));
        let memo = match &config.output.cache_dir {
            Some(dir) => EvaluationMemo::persistent(dir)
                .with_context(|| format!("Failed to open evaluation cache {dir}"))?,
            None => EvaluationMemo::new(),
        };
        let selector = Arc::new(
            Selector::new(cache, Arc::new(memo), training.grid.clone())
                .context("Invalid search grid")?,
        );
        let outcomes = selector.select_all().await.context("Model selection failed")?;
        let registry = build_registry(&outcomes);

        if let Some(report_path) = &config.output.report_path {
            SelectionReport::new(&outcomes, &registry, training.seed, training.train_size)
                .save(report_path)
                .with_context(|| format!("Failed to write selection report to {report_path}"))?;
            info!(path = %report_path, "Selection report written");
        }
        registry
    };

    registry
        .save(&config.output.registry_path)
        .with_context(|| format!("Failed to write registry to {}", config.output.registry_path))?;

    info!(
        models = registry.len(),
        path = %config.output.registry_path,
        "Training complete"
    );
    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let level = match logging.verbosity {
        0 => "off",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("trainer_node={level},waf_common={level}").into()
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
