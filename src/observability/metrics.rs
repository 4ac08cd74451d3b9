//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_requests_total` (counter): requests seen by the gate, by method
//! - `guard_csrf_rejections_total` (counter): CSRF rejections, by reason
//! - `guard_rate_limited_total` (counter): 429 responses, by category
//! - `guard_tokens_issued_total` (counter): freshly minted CSRF tokens
//! - `guard_rate_limit_keys` (gauge): live keys in the memory store
//!
//! # Design Decisions
//! - Uses the `metrics` facade; recording is a no-op until an exporter is installed
//! - Prometheus exporter runs its own HTTP listener

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str) {
    counter!("guard_requests_total", "method" => method.to_string()).increment(1);
}

pub fn record_csrf_rejection(reason: &'static str) {
    counter!("guard_csrf_rejections_total", "reason" => reason).increment(1);
}

pub fn record_rate_limited(category: &'static str) {
    counter!("guard_rate_limited_total", "category" => category).increment(1);
}

pub fn record_token_issued() {
    counter!("guard_tokens_issued_total").increment(1);
}

pub fn record_rate_limit_keys(count: usize) {
    gauge!("guard_rate_limit_keys").set(count as f64);
}
