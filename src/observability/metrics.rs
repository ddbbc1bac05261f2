//! Metrics collection.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): completed requests by method, status
//! - `gateway_request_duration_seconds` (histogram): time from parsed head to last byte
//! - `gateway_active_connections` (gauge): current connection count
//! - `gateway_parse_errors_total` (counter): rejected request heads by status
//! - `gateway_app_errors_total` (counter): application failures by phase
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; the embedding binary decides
//!   whether and how to export them
//! - Every recorder is a no-op when metrics are disabled

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Turn recording on or off process-wide.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

fn enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Register descriptions with the installed recorder.
pub fn describe() {
    metrics::describe_counter!("gateway_requests_total", "Completed requests");
    metrics::describe_histogram!(
        "gateway_request_duration_seconds",
        metrics::Unit::Seconds,
        "Time from parsed request head to last response byte"
    );
    metrics::describe_gauge!("gateway_active_connections", "Open client connections");
    metrics::describe_counter!("gateway_parse_errors_total", "Rejected request heads");
    metrics::describe_counter!("gateway_app_errors_total", "Application failures");
}

pub fn record_request(method: &str, status: u16, elapsed: Duration) {
    if !enabled() {
        return;
    }
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "method" => method.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn set_active_connections(count: u64) {
    if enabled() {
        metrics::gauge!("gateway_active_connections").set(count as f64);
    }
}

pub fn record_parse_error(status: u16) {
    if enabled() {
        metrics::counter!("gateway_parse_errors_total", "status" => status.to_string())
            .increment(1);
    }
}

pub fn record_app_error(headers_sent: bool) {
    if enabled() {
        let phase = if headers_sent { "streaming" } else { "before_headers" };
        metrics::counter!("gateway_app_errors_total", "phase" => phase).increment(1);
    }
}
