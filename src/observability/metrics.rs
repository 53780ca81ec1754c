//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_commands_total` (counter): commands by method and outcome
//! - `bridge_command_duration_seconds` (histogram): execution latency by method
//! - `bridge_command_queue_depth` (gauge): commands waiting for dispatch
//! - `bridge_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `bridge_circuit_transitions_total` (counter): breaker transitions by target state
//! - `bridge_connection_state` (gauge): 0=connected, 1=disconnected, 2=reconnecting, 3=failed
//! - `bridge_reconnect_attempts_total` (counter): connection attempts by outcome
//! - `bridge_events_total` (counter): dispatched events by type
//! - `bridge_event_handler_failures_total` (counter): failed handler invocations by type
//! - `bridge_events_filtered_total` (counter): events dropped by the filter chain
//! - `bridge_events_buffered_total` (counter): disconnect-buffer outcomes
//! - `bridge_events_replayed_total` (counter): replay outcomes after reconnect

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished command.
pub fn record_command(method: &str, outcome: &'static str, start: Instant) {
    ::metrics::counter!(
        "bridge_commands_total",
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!("bridge_command_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_queue_depth(depth: usize) {
    ::metrics::gauge!("bridge_command_queue_depth").set(depth as f64);
}

/// Record a circuit breaker transition.
pub fn record_circuit_transition(breaker: &str, to: &'static str, gauge_value: f64) {
    ::metrics::counter!(
        "bridge_circuit_transitions_total",
        "breaker" => breaker.to_string(),
        "to" => to
    )
    .increment(1);
    ::metrics::gauge!("bridge_circuit_state", "breaker" => breaker.to_string()).set(gauge_value);
}

pub fn record_connection_state(gauge_value: f64) {
    ::metrics::gauge!("bridge_connection_state").set(gauge_value);
}

pub fn record_reconnect_attempt(outcome: &'static str) {
    ::metrics::counter!("bridge_reconnect_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_event(event_type: &str) {
    ::metrics::counter!("bridge_events_total", "event_type" => event_type.to_string())
        .increment(1);
}

pub fn record_handler_failure(event_type: &str) {
    ::metrics::counter!(
        "bridge_event_handler_failures_total",
        "event_type" => event_type.to_string()
    )
    .increment(1);
}

pub fn record_event_filtered(event_type: &str, filter: &str) {
    ::metrics::counter!(
        "bridge_events_filtered_total",
        "event_type" => event_type.to_string(),
        "filter" => filter.to_string()
    )
    .increment(1);
}

/// Record what happened to an event arriving while disconnected.
pub fn record_event_buffered(outcome: &'static str) {
    ::metrics::counter!("bridge_events_buffered_total", "outcome" => outcome).increment(1);
}

pub fn record_events_replayed(outcome: &'static str, count: usize) {
    ::metrics::counter!("bridge_events_replayed_total", "outcome" => outcome)
        .increment(count as u64);
}
