//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by status and outcome
//! - `proxy_request_duration_seconds` (histogram): end-to-end latency
//! - `proxy_identity_overrides_total` (counter): trusted header
//!   overrides applied, by field
//! - `proxy_resolve_failures_total` (counter): DNS lookups that
//!   produced no address
//! - `proxy_target_denied_total` (counter): destinations refused by
//!   the loopback/LAN guard, by reason
//! - `proxy_pipeline_faults_total` (counter): faults routed to the
//!   terminal error stage
//!
//! # Design Decisions
//! - The `metrics` facade keeps call sites free of exporter details;
//!   the Prometheus recorder is installed once at startup
//! - Labels stay low-cardinality (status, outcome, field names), with
//!   the deliberate exception of the failed-hostname key

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(address: SocketAddr) {
    match PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
    {
        Ok(()) => tracing::info!(address = %address, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics recorder"),
    }
}

/// Record a completed request.
pub fn record_request(status: u16, outcome: &'static str, elapsed: Duration) {
    counter!(
        "proxy_requests_total",
        "status" => status.to_string(),
        "outcome" => outcome,
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds").record(elapsed.as_secs_f64());
}

/// Record one trusted identity override (client IP, host, scheme,
/// port).
pub fn record_identity_override(field: &'static str) {
    counter!("proxy_identity_overrides_total", "field" => field).increment(1);
}

/// Record a hostname that produced no usable address, keyed by the
/// hostname that failed.
pub fn record_resolve_failure(hostname: &str) {
    counter!("proxy_resolve_failures_total", "hostname" => hostname.to_string()).increment(1);
}

/// Record a destination refused by the loopback/LAN guard.
pub fn record_target_denied(reason: &'static str) {
    counter!("proxy_target_denied_total", "reason" => reason).increment(1);
}

/// Record a fault routed to the terminal error stage.
pub fn record_pipeline_fault() {
    counter!("proxy_pipeline_faults_total").increment(1);
}
