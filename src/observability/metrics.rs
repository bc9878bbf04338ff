//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lb_requests_total` (counter): requests by method, status, backend
//! - `lb_request_duration_seconds` (histogram): latency distribution
//! - `lb_proxy_errors_total` (counter): transport failures per backend
//! - `lb_backend_up` (gauge): 1=alive, 0=dead, per backend
//! - `lb_health_sweeps_total` (counter): sweeps by outcome
//! - `lb_health_sweep_duration_seconds` (histogram)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    counter!(
        "lb_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);
    histogram!("lb_request_duration_seconds", "backend" => backend.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_proxy_error(backend: &str) {
    counter!("lb_proxy_errors_total", "backend" => backend.to_string()).increment(1);
}

pub fn record_backend_health(backend: &str, alive: bool) {
    gauge!("lb_backend_up", "backend" => backend.to_string()).set(if alive { 1.0 } else { 0.0 });
}

pub fn record_sweep(outcome: &'static str, start: Instant) {
    counter!("lb_health_sweeps_total", "outcome" => outcome).increment(1);
    histogram!("lb_health_sweep_duration_seconds").record(start.elapsed().as_secs_f64());
}
