//! Health check handler.
//!
//! `GET /v1/health` pings the store. 200 when it answers, 503 otherwise.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

/// Health handler.
///
/// Store errors are logged server-side; the response only says "unhealthy".
#[tracing::instrument(skip_all, name = "queue.health")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let instance_id = state.config.instance_id.clone();

    match state.service.ping_store().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                instance_id,
                store: Some("healthy".to_string()),
            }),
        ),
        Err(e) => {
            tracing::warn!(target: "queue.handlers.health", error = %e, "Health check failed: store error");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    instance_id,
                    store: Some("unhealthy".to_string()),
                }),
            )
        }
    }
}
