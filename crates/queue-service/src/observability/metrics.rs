//! Metrics definitions for the queue service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `queue_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `method`: HTTP verbs
//! - `endpoint`: parameterized paths (provider IDs replaced by `{id}`)
//! - `outcome` / `status`: fixed sets per metric
//! - `operation`: store operations, bounded by code
//! - `channel`: `changes`, `ring`, `presence`

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("queue_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("queue_call_next".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set call-next buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("queue_store_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set store query buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `queue_http_requests_total`, `queue_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("queue_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("queue_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Provider sub-resources exposed under `/v1/providers/{id}/`.
const PROVIDER_ACTIONS: &[&str] = &[
    "entries",
    "call-next",
    "online",
    "end-session",
    "ring",
    "changes",
    "presence",
    "now-serving",
];

/// Normalize endpoint path to prevent label cardinality explosion
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/" | "/metrics" | "/v1/health" | "/v1/providers" => path.to_string(),
        _ => normalize_dynamic_endpoint(path),
    }
}

/// Replace provider IDs with a placeholder.
fn normalize_dynamic_endpoint(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();

    // ["", "v1", "providers", "{id}", ...]
    if parts.get(1) == Some(&"v1") && parts.get(2) == Some(&"providers") {
        match (parts.len(), parts.get(4)) {
            (4, _) => return "/v1/providers/{id}".to_string(),
            (5, Some(action)) if PROVIDER_ACTIONS.contains(action) => {
                return format!("/v1/providers/{{id}}/{action}");
            }
            _ => {}
        }
    }

    // Unknown paths normalized to "/other" to bound cardinality
    "/other".to_string()
}

// ============================================================================
// Queue Operation Metrics
// ============================================================================

/// Record a registration attempt.
///
/// Metric: `queue_registrations_total`
/// Labels: `outcome` (success, duplicate, provider_unavailable, validation,
/// not_found, concurrency, internal)
pub fn record_registration(outcome: &str) {
    counter!("queue_registrations_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a call-next transition.
///
/// Metric: `queue_call_next_total`, `queue_call_next_duration_seconds`
/// Labels: `outcome` (called, empty, replayed, error, timeout)
pub fn record_call_next(outcome: &str, duration: Duration) {
    histogram!("queue_call_next_duration_seconds",
        "outcome" => outcome.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("queue_call_next_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a ring signal publish.
///
/// Metric: `queue_ring_signals_total`
/// Labels: `delivered` (true when at least one display was connected)
pub fn record_ring_signal(receivers: usize) {
    counter!("queue_ring_signals_total",
        "delivered" => (receivers > 0).to_string()
    )
    .increment(1);
}

/// Record a session termination.
///
/// Metric: `queue_sessions_ended_total`
/// Labels: `outcome` (complete, partial, error)
pub fn record_session_ended(outcome: &str) {
    counter!("queue_sessions_ended_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ============================================================================
// Notification Bus Metrics
// ============================================================================

/// Record a value published on the bus.
///
/// Metric: `queue_bus_events_published_total`
/// Labels: `channel`
pub fn record_bus_published(channel: &str) {
    counter!("queue_bus_events_published_total",
        "channel" => channel.to_string()
    )
    .increment(1);
}

/// Record values skipped by a lagging subscriber.
///
/// Metric: `queue_bus_events_dropped_total`
/// Labels: `channel`
pub fn record_bus_dropped(channel: &str, missed: u64) {
    counter!("queue_bus_events_dropped_total",
        "channel" => channel.to_string()
    )
    .increment(missed);
}

// ============================================================================
// Store Metrics
// ============================================================================

/// Record store query execution
///
/// Metric: `queue_store_query_duration_seconds`, `queue_store_queries_total`
/// Labels: `operation`, `status` (success, rejected, error)
pub fn record_store_query(operation: &str, status: &str, duration: Duration) {
    histogram!("queue_store_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("queue_store_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Actor Metrics
// ============================================================================

/// Set the number of running provider actors.
///
/// Metric: `queue_provider_actors`
pub fn set_provider_actors(count: usize) {
    gauge!("queue_provider_actors").set(count as f64);
}

/// Record an actor panic.
///
/// Metric: `queue_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &str) {
    counter!("queue_actor_panics_total",
        "actor_type" => actor_type.to_string()
    )
    .increment(1);
}
