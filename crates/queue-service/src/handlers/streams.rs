//! Server-sent event streams.
//!
//! - `GET /v1/providers/:id/changes` - Entry snapshots (`change` events)
//! - `GET /v1/providers/:id/ring` - Ring pulses (`ring` events)
//! - `GET /v1/providers/:id/presence` - Online flag (`presence` events)
//! - `GET /v1/providers/:id/now-serving` - Reconciled called slot
//!   (`now_serving` events)
//!
//! Every stream opens with a `connected` event once the subscription is
//! live, so a client knows that later events will reach it. A subscriber that
//! falls behind gets a `lagged` event with `{"missed": n}` and should re-read
//! `GET /v1/providers/:id/entries`. Nothing published before connecting is
//! replayed.

use super::parse_provider_id;
use crate::errors::QueueError;
use crate::notifications::{Delivery, Subscription};
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

type EventStream = Sse<stream::BoxStream<'static, Result<Event, Infallible>>>;

fn connected() -> impl Stream<Item = Result<Event, Infallible>> {
    stream::once(async { Ok(Event::default().event("connected").data("ok")) })
}

/// Serialize one value as a named SSE event. Values that fail to serialize
/// are skipped.
fn json_event<T: Serialize>(name: &'static str, value: &T) -> Option<Event> {
    Event::default().event(name).json_data(value).ok()
}

/// Forward a bus subscription as SSE events named `name`, until the
/// client disconnects or the service shuts down.
fn forward<T>(
    name: &'static str,
    subscription: Subscription<T>,
    shutdown: CancellationToken,
) -> EventStream
where
    T: Serialize + Send + 'static,
{
    let events = subscription.filter_map(move |delivery| async move {
        match delivery {
            Delivery::Event(value) => json_event(name, &value).map(Ok),
            Delivery::Lagged(missed) => {
                json_event("lagged", &serde_json::json!({ "missed": missed })).map(Ok)
            }
        }
    });

    let stream = connected()
        .chain(events)
        .take_until(shutdown.cancelled_owned());
    Sse::new(stream.boxed()).keep_alive(KeepAlive::default())
}

/// Handler for GET /v1/providers/:id/changes
#[instrument(
    skip_all,
    name = "queue.handlers.stream_changes",
    fields(method = "GET", endpoint = "/v1/providers/{id}/changes")
)]
pub async fn stream_changes(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
) -> Result<EventStream, QueueError> {
    let provider_id = parse_provider_id(&provider_id)?;
    let subscription = state.service.subscribe_changes(provider_id).await?;
    debug!(target: "queue.handlers.streams", provider_id = %provider_id, "Change stream opened");
    Ok(forward("change", subscription, state.service.shutdown_token()))
}

/// Handler for GET /v1/providers/:id/ring
#[instrument(
    skip_all,
    name = "queue.handlers.stream_ring",
    fields(method = "GET", endpoint = "/v1/providers/{id}/ring")
)]
pub async fn stream_ring(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
) -> Result<EventStream, QueueError> {
    let provider_id = parse_provider_id(&provider_id)?;
    let subscription = state.service.subscribe_ring(provider_id).await?;
    debug!(target: "queue.handlers.streams", provider_id = %provider_id, "Ring stream opened");
    Ok(forward("ring", subscription, state.service.shutdown_token()))
}

/// Handler for GET /v1/providers/:id/presence
#[instrument(
    skip_all,
    name = "queue.handlers.stream_presence",
    fields(method = "GET", endpoint = "/v1/providers/{id}/presence")
)]
pub async fn stream_presence(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
) -> Result<EventStream, QueueError> {
    let provider_id = parse_provider_id(&provider_id)?;
    let subscription = state.service.subscribe_presence(provider_id).await?;
    Ok(forward("presence", subscription, state.service.shutdown_token()))
}

/// Handler for GET /v1/providers/:id/now-serving
///
/// The first `now_serving` event is the current state; later ones are sent
/// only when the called entry changes.
#[instrument(
    skip_all,
    name = "queue.handlers.stream_now_serving",
    fields(method = "GET", endpoint = "/v1/providers/{id}/now-serving")
)]
pub async fn stream_now_serving(
    State(state): State<Arc<AppState>>,
    Path(provider_id): Path<String>,
) -> Result<EventStream, QueueError> {
    let provider_id = parse_provider_id(&provider_id)?;
    let snapshots = state.service.now_serving(provider_id).await?;

    let events =
        snapshots.filter_map(|snapshot| async move { json_event("now_serving", &snapshot).map(Ok) });

    Ok(Sse::new(connected().chain(events).boxed()).keep_alive(KeepAlive::default()))
}
