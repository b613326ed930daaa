//! Queue handlers.
//!
//! - `POST /v1/providers/:id/entries` - Register a holder
//! - `GET /v1/providers/:id/entries` - List entries by token number
//! - `POST /v1/providers/:id/call-next` - Advance the queue
//! - `POST /v1/providers/:id/online` - Toggle registrations
//! - `POST /v1/providers/:id/end-session` - Go offline and clear the queue
//! - `POST /v1/providers/:id/ring` - Ring the provider's displays
//!
//! Duplicate registrations and offline providers are expected outcomes and
//! come back as 409 with their own error code.

use super::{json_body, parse_provider_id};
use crate::errors::QueueError;
use crate::models::{
    CallNextRequest, CallNextResponse, EndSessionResponse, ListEntriesResponse, OkResponse,
    RegisterRequest, RegisterResponse, ToggleOnlineRequest, ToggleOnlineResponse,
};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Handler for POST /v1/providers/:id/entries
///
/// # Response
///
/// - 201 Created: `{token_number, entry_id}`
/// - 400 Bad Request: Missing or malformed name/contact
/// - 404 Not Found: Unknown provider
/// - 409 Conflict: `duplicate` or `provider_unavailable`
#[instrument(
    skip_all,
    name = "queue.handlers.register",
    fields(method = "POST", endpoint = "/v1/providers/{id}/entries")
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), QueueError> {
    let provider_id = parse_provider_id(&provider_id)?;
    let request = json_body(payload)?;
    let entry = state.service.register(provider_id, &request).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            token_number: entry.token_number,
            entry_id: entry.id,
        }),
    ))
}

/// Handler for GET /v1/providers/:id/entries
#[instrument(
    skip_all,
    name = "queue.handlers.list_entries",
    fields(method = "GET", endpoint = "/v1/providers/{id}/entries")
)]
pub async fn list_entries(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
) -> Result<Json<ListEntriesResponse>, QueueError> {
    let provider_id = parse_provider_id(&provider_id)?;
    let entries = state.service.list_entries(provider_id).await?;
    Ok(Json(ListEntriesResponse { entries }))
}

/// Handler for POST /v1/providers/:id/call-next
///
/// The body is optional. `{"request_id": "..."}` makes a retry of the same
/// request return the first outcome instead of advancing again.
///
/// # Response
///
/// - 200 OK: `{called: Entry | null}`
/// - 400 Bad Request: Malformed body
/// - 404 Not Found: Unknown provider
#[instrument(
    skip_all,
    name = "queue.handlers.call_next",
    fields(method = "POST", endpoint = "/v1/providers/{id}/call-next")
)]
pub async fn call_next(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
    body: Bytes,
) -> Result<Json<CallNextResponse>, QueueError> {
    let provider_id = parse_provider_id(&provider_id)?;

    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CallNextRequest::default()
    } else {
        serde_json::from_slice::<CallNextRequest>(&body)
            .map_err(|e| QueueError::Validation(format!("invalid request body: {e}")))?
    };

    let called = state.service.call_next(provider_id, request).await?;
    Ok(Json(CallNextResponse { called }))
}

/// Handler for POST /v1/providers/:id/online
///
/// `{"online": bool}` is required; anything else is a 400.
#[instrument(
    skip_all,
    name = "queue.handlers.toggle_online",
    fields(method = "POST", endpoint = "/v1/providers/{id}/online")
)]
pub async fn toggle_online(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
    payload: Result<Json<ToggleOnlineRequest>, JsonRejection>,
) -> Result<Json<ToggleOnlineResponse>, QueueError> {
    let provider_id = parse_provider_id(&provider_id)?;
    let request = json_body(payload)?;
    let provider = state.service.set_online(provider_id, request.online).await?;
    Ok(Json(ToggleOnlineResponse {
        is_online: provider.is_online,
    }))
}

/// Handler for POST /v1/providers/:id/end-session
///
/// The provider is always left offline. `ok` is false and `remaining` lists
/// the surviving entry IDs when the queue could only be partly cleared.
#[instrument(
    skip_all,
    name = "queue.handlers.end_session",
    fields(method = "POST", endpoint = "/v1/providers/{id}/end-session")
)]
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
) -> Result<Json<EndSessionResponse>, QueueError> {
    let provider_id = parse_provider_id(&provider_id)?;
    let outcome = state.service.end_session(provider_id).await?;

    let ok = outcome.remaining.is_empty();
    if ok {
        info!(
            target: "queue.handlers.queue",
            provider_id = %provider_id,
            removed = outcome.removed.len(),
            "Session ended"
        );
    } else {
        warn!(
            target: "queue.handlers.queue",
            provider_id = %provider_id,
            remaining = outcome.remaining.len(),
            "Session ended with entries left behind"
        );
    }

    Ok(Json(EndSessionResponse {
        ok,
        removed: outcome.removed.len(),
        remaining: outcome.remaining,
    }))
}

/// Handler for POST /v1/providers/:id/ring
///
/// `{ok: true}` even when no display is connected.
#[instrument(
    skip_all,
    name = "queue.handlers.ring",
    fields(method = "POST", endpoint = "/v1/providers/{id}/ring")
)]
pub async fn ring(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
) -> Result<Json<OkResponse>, QueueError> {
    let provider_id = parse_provider_id(&provider_id)?;
    state.service.ring(provider_id).await?;
    Ok(Json(OkResponse { ok: true }))
}
