//! Queue service error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Store failures are logged server-side and returned to clients as a generic
//! message. Duplicate registrations and offline providers are expected,
//! display-worthy outcomes and carry their message through unchanged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Postgres SQLSTATE for `unique_violation`.
const PG_UNIQUE_VIOLATION: &str = "23505";

/// Partial unique index guarding one pending entry per (provider, contact).
pub const PENDING_CONTACT_CONSTRAINT: &str = "entries_pending_contact_key";

/// Queue service error type.
///
/// Maps to HTTP status codes:
/// - Validation: 400 Bad Request
/// - NotFound: 404 Not Found
/// - Duplicate, ProviderUnavailable, Concurrency: 409 Conflict
/// - Store, Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum QueueError {
    /// Missing or malformed input, rejected before touching the store.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The holder already has a pending entry with this provider.
    #[error("Duplicate registration: {0}")]
    Duplicate(String),

    /// The provider is offline and not accepting registrations.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Unknown provider or entry.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lost a race for the called slot or the token sequence.
    /// Safe to retry the whole operation from scratch.
    #[error("Concurrency conflict: {0}")]
    Concurrency(String),

    /// Durable storage failed or timed out.
    #[error("Store error: {0}")]
    Store(String),

    /// Actor mailbox or response channel failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            QueueError::Validation(_) => 400,
            QueueError::NotFound(_) => 404,
            QueueError::Duplicate(_)
            | QueueError::ProviderUnavailable(_)
            | QueueError::Concurrency(_) => 409,
            QueueError::Store(_) | QueueError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code returned in the error body.
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::Validation(_) => "validation",
            QueueError::Duplicate(_) => "duplicate",
            QueueError::ProviderUnavailable(_) => "provider_unavailable",
            QueueError::NotFound(_) => "not_found",
            QueueError::Concurrency(_) => "concurrency",
            QueueError::Store(_) | QueueError::Internal(_) => "internal",
        }
    }

    /// Whether this outcome is an expected user-facing result rather than a
    /// system failure. Expected outcomes are logged at `info`, not `warn`.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            QueueError::Duplicate(_)
                | QueueError::ProviderUnavailable(_)
                | QueueError::Validation(_)
                | QueueError::NotFound(_)
        )
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for QueueError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            QueueError::Validation(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            QueueError::Duplicate(reason) | QueueError::ProviderUnavailable(reason) => {
                (StatusCode::CONFLICT, reason.clone())
            }
            QueueError::NotFound(resource) => (StatusCode::NOT_FOUND, resource.clone()),
            QueueError::Concurrency(reason) => {
                tracing::warn!(target: "queue.errors", reason = %reason, "Concurrency conflict");
                (
                    StatusCode::CONFLICT,
                    "The queue changed concurrently, please retry".to_string(),
                )
            }
            QueueError::Store(err) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "queue.store", error = %err, "Store operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
            QueueError::Internal(err) => {
                tracing::error!(target: "queue.errors", error = %err, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// Convert sqlx errors to `QueueError`.
///
/// A unique violation on the pending-contact index is a duplicate registration;
/// any other unique violation means a concurrent writer took the same token or
/// called slot first.
impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some(PG_UNIQUE_VIOLATION) {
                if db_err.constraint() == Some(PENDING_CONTACT_CONSTRAINT) {
                    return QueueError::Duplicate(
                        "Already registered with this provider".to_string(),
                    );
                }
                return QueueError::Concurrency(db_err.message().to_string());
            }
        }
        QueueError::Store(err.to_string())
    }
}
