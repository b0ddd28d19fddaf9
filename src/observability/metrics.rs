//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_sessions_total` (counter): finished sessions by outcome
//! - `proxy_session_duration_seconds` (histogram): accept-to-close latency
//! - `proxy_active_sessions` (gauge): sessions currently running
//! - `proxy_cache_lookups_total` (counter): lookups by result (hit/miss)
//! - `proxy_cache_writes_total` (counter): entry writes by outcome
//! - `proxy_bytes_relayed_total` (counter): bytes sent to clients by source
//!
//! Without an installed recorder every call is a no-op, so tests and
//! deployments with metrics disabled pay nothing.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe();
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

fn describe() {
    describe_counter!("proxy_sessions_total", "Finished client sessions by outcome");
    describe_histogram!(
        "proxy_session_duration_seconds",
        "Time from accept to close of a client session"
    );
    describe_gauge!("proxy_active_sessions", "Client sessions currently running");
    describe_counter!("proxy_cache_lookups_total", "Cache lookups by result");
    describe_counter!("proxy_cache_writes_total", "Cache entry writes by outcome");
    describe_counter!("proxy_bytes_relayed_total", "Bytes written to clients by source");
}

pub fn record_session(outcome: &'static str, started: Instant) {
    counter!("proxy_sessions_total", "outcome" => outcome).increment(1);
    histogram!("proxy_session_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_active_sessions(count: u64) {
    gauge!("proxy_active_sessions").set(count as f64);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("proxy_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_write(outcome: &'static str) {
    counter!("proxy_cache_writes_total", "outcome" => outcome).increment(1);
}

pub fn record_bytes_relayed(source: &'static str, bytes: u64) {
    counter!("proxy_bytes_relayed_total", "source" => source).increment(bytes);
}
