//! Metric names and the Prometheus exporter

use crate::error::{ProxyError, Result};
use metrics::{describe_counter, describe_histogram, Unit};
use std::net::SocketAddr;
use tracing::info;

pub const REQUESTS_RECEIVED: &str = "waf_requests_received_total";
pub const REQUESTS_FORWARDED: &str = "waf_requests_forwarded_total";
pub const REQUESTS_BLOCKED: &str = "waf_requests_blocked_total";
pub const REQUESTS_ANOMALOUS: &str = "waf_requests_anomalous_total";
pub const REQUESTS_NOT_IMPLEMENTED: &str = "waf_requests_not_implemented_total";
pub const UPSTREAM_ERRORS: &str = "waf_upstream_errors_total";
pub const SCORING_DURATION: &str = "waf_scoring_duration_seconds";

/// Register descriptions with whichever recorder is installed
pub fn describe_metrics() {
    describe_counter!(REQUESTS_RECEIVED, "Requests accepted by the proxy");
    describe_counter!(REQUESTS_FORWARDED, "Requests relayed to the upstream");
    describe_counter!(REQUESTS_BLOCKED, "Requests answered with a blocking response");
    describe_counter!(REQUESTS_ANOMALOUS, "Requests scored anomalous, blocked or not");
    describe_counter!(REQUESTS_NOT_IMPLEMENTED, "Requests rejected for method or scheme");
    describe_counter!(UPSTREAM_ERRORS, "Upstream connection failures and timeouts");
    describe_histogram!(SCORING_DURATION, Unit::Seconds, "Feature extraction plus scoring time");
}

/// Install the Prometheus recorder with its own scrape listener
pub fn install_exporter(listen_addr: SocketAddr) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(listen_addr)
        .install()
        .map_err(|e| ProxyError::Config(format!("Failed to install Prometheus exporter: {e}")))?;
    describe_metrics();

    info!(metrics_addr = %listen_addr, "Prometheus metrics server started");
    Ok(())
}
