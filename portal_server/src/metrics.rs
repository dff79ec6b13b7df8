//! Prometheus metrics for the auth service.
//!
//! Recording is always cheap: without an installed exporter the `metrics`
//! macros are no-ops. The exporter is installed only when `METRICS_BIND`
//! is configured.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus exporter on `addr`.
///
/// Metrics are served at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

/// `outcome` is `success`, `rejected` or `rate_limited`.
pub fn login_attempt(outcome: &'static str) {
    metrics::counter!("auth_login_attempts_total", "outcome" => outcome).increment(1);
}

/// `outcome` is `success` or the error code.
pub fn refresh(outcome: &'static str) {
    metrics::counter!("auth_refresh_total", "outcome" => outcome).increment(1);
}

pub fn cleanup(scope: &'static str) {
    metrics::counter!("auth_cleanup_total", "scope" => scope).increment(1);
}

/// Live session count reported by the last sweep.
pub fn sessions_active(count: u64) {
    metrics::gauge!("auth_sessions_active").set(count as f64);
}

pub fn rate_limit_hit(endpoint: &'static str) {
    metrics::counter!("rate_limit_hits_total", "endpoint" => endpoint).increment(1);
}
