//! HTTP request handlers for the queue service.

pub mod health;
pub mod metrics;
pub mod providers;
pub mod queue;
pub mod streams;

pub use health::health_check;
pub use metrics::metrics_handler;
pub use providers::{get_provider, login};
pub use queue::{call_next, end_session, list_entries, register, ring, toggle_online};
pub use streams::{stream_changes, stream_now_serving, stream_presence, stream_ring};

use crate::errors::QueueError;
use axum::extract::rejection::JsonRejection;
use axum::Json;
use common::types::ProviderId;

/// Parse the `:id` path segment.
pub(crate) fn parse_provider_id(raw: &str) -> Result<ProviderId, QueueError> {
    raw.parse()
        .map_err(|_| QueueError::Validation("provider id must be a UUID".to_string()))
}

/// Unwrap a JSON body, turning missing fields, wrong types, unknown fields
/// and a missing content type into a validation error.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, QueueError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| {
            QueueError::Validation(format!("invalid request body: {}", rejection.body_text()))
        })
}
