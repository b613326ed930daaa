//! HTTP routes for the queue service.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::services::QueueService;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Queue operations.
    pub service: QueueService,

    /// Service configuration.
    pub config: Config,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/v1/health` - Store connectivity check
/// - `/metrics` - Prometheus metrics endpoint
/// - `/v1/providers` - Provider first login
/// - `/v1/providers/:id/...` - Queue operations and SSE streams
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout
///
/// SSE responses are returned before the timeout fires; the stream body
/// itself is not subject to it.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let api_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .route("/v1/providers", post(handlers::login))
        .route("/v1/providers/:id", get(handlers::get_provider))
        .route(
            "/v1/providers/:id/entries",
            post(handlers::register).get(handlers::list_entries),
        )
        .route("/v1/providers/:id/call-next", post(handlers::call_next))
        .route("/v1/providers/:id/online", post(handlers::toggle_online))
        .route("/v1/providers/:id/end-session", post(handlers::end_session))
        .route(
            "/v1/providers/:id/ring",
            post(handlers::ring).get(handlers::stream_ring),
        )
        .route("/v1/providers/:id/changes", get(handlers::stream_changes))
        .route("/v1/providers/:id/presence", get(handlers::stream_presence))
        .route(
            "/v1/providers/:id/now-serving",
            get(handlers::stream_now_serving),
        )
        .with_state(state);

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    api_routes
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
