//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by service, method, status
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_auth_failures_total` (counter): rejected callers by tier
//! - `gateway_registrations_total` (counter): build outcomes (`mounted`, `failed`)
//! - `gateway_mounted_services` (gauge): size of the mount table
//!
//! Recording is a no-op until [`init_metrics`] installs the Prometheus
//! recorder, so tests and embedders never need to set anything up.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the global recorder and serve `/metrics` on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(service: &str, method: &str, status: u16, start: Instant) {
    let status = status.to_string();
    counter!(
        "gateway_requests_total",
        "service" => service.to_string(),
        "method" => method.to_string(),
        "status" => status.clone()
    )
    .increment(1);
    histogram!(
        "gateway_request_duration_seconds",
        "service" => service.to_string(),
        "status" => status
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_auth_failure(tier: &str) {
    counter!("gateway_auth_failures_total", "tier" => tier.to_string()).increment(1);
}

pub fn record_registration(outcome: &'static str) {
    counter!("gateway_registrations_total", "outcome" => outcome).increment(1);
}

pub fn set_mounted_services(count: usize) {
    gauge!("gateway_mounted_services").set(count as f64);
}
