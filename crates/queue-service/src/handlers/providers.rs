//! Provider handlers.
//!
//! - `POST /v1/providers` - First login by contact (find or create)
//! - `GET /v1/providers/:id` - Provider lookup

use super::{json_body, parse_provider_id};
use crate::errors::QueueError;
use crate::models::{Provider, ProviderLoginRequest};
use crate::routes::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /v1/providers
///
/// Returns the existing provider for a known contact, or a new offline one.
#[instrument(skip_all, name = "queue.handlers.login", fields(method = "POST", endpoint = "/v1/providers"))]
pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ProviderLoginRequest>, JsonRejection>,
) -> Result<Json<Provider>, QueueError> {
    let request = json_body(payload)?;
    let provider = state.service.login(&request).await?;
    Ok(Json(provider))
}

/// Handler for GET /v1/providers/:id
#[instrument(skip_all, name = "queue.handlers.get_provider", fields(method = "GET", endpoint = "/v1/providers/{id}"))]
pub async fn get_provider(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
) -> Result<Json<Provider>, QueueError> {
    let provider_id = parse_provider_id(&provider_id)?;
    let provider = state.service.get_provider(provider_id).await?;
    Ok(Json(provider))
}
