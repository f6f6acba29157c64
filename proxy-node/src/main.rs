use anyhow::{Context, Result};
use proxy_node::{
    load_registry, telemetry, AnomalyFilter, ProxyConfig, ProxyPipeline, ProxyServer,
    UpstreamClient,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trainer_node::config::LoggingConfig;
use waf_common::Canonicalizer;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("WAF_PROXY_CONFIG").ok())
        .unwrap_or_else(|| "config/proxy.toml".to_string());

    let config = if std::path::Path::new(&config_path).exists() {
        ProxyConfig::from_file(&config_path)
            .with_context(|| format!("Failed to load configuration from {config_path}"))?
    } else {
        ProxyConfig::default()
    };

    init_logging(&config.logging);
    info!(config = %config_path, "Starting proxy node v{}", env!("CARGO_PKG_VERSION"));

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    if config.metrics.enabled {
        telemetry::install_exporter(config.metrics_addr()?)?;
    } else {
        info!("Metrics exporter is disabled");
    }

    let canonicalizer = Canonicalizer::new(&config.filter.exclusions);
    let upstream = UpstreamClient::new(config.upstream_addr()?, config.upstream_timeout());
    let mut pipeline =
        ProxyPipeline::new(upstream, canonicalizer.clone(), config.network.max_body_bytes);

    if config.filter.detection_enabled {
        let registry = load_registry(&config.model, &canonicalizer)
            .context("Failed to load detection models")?;
        if !config.filter.blocking_enabled {
            warn!("Blocking disabled, anomalous requests are logged and forwarded");
        }
        pipeline = pipeline.with_hook(Arc::new(AnomalyFilter::new(
            Arc::new(registry),
            config.filter.blocking_enabled,
        )));
    } else {
        warn!("Detection disabled, all traffic passes through");
    }

    let server = ProxyServer::bind(
        config.listen_addr()?,
        Arc::new(pipeline),
        config.network.max_header_bytes,
    )
    .await
    .context("Failed to bind listener")?;

    tokio::select! {
        result = server.run() => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, terminating proxy");
            Ok(())
        }
    }
}

fn init_logging(logging: &LoggingConfig) {
    let level = match logging.verbosity {
        0 => "off",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("proxy_node={level},waf_common={level}").into());

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
