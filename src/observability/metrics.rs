//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_exchanges_total` (counter): retired exchanges by response status
//! - `proxy_exchange_duration_seconds` (histogram): request start to retirement
//! - `proxy_error_replies_total` (counter): proxy-generated error pages by status
//! - `proxy_active_connections` (gauge): live client connections

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_exchange(status: u16, elapsed: Duration) {
    metrics::counter!("proxy_exchanges_total", "status" => status.to_string()).increment(1);
    metrics::histogram!("proxy_exchange_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_error_reply(status: u16) {
    metrics::counter!("proxy_error_replies_total", "status" => status.to_string()).increment(1);
}

pub fn set_active_connections(count: u64) {
    metrics::gauge!("proxy_active_connections").set(count as f64);
}
