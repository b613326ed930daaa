//! Notification bus: realtime fan-out of queue changes and ring signals.
//!
//! Three channels with different guarantees:
//!
//! | Channel  | Scope                       | Payload            | Delivery                       |
//! |----------|-----------------------------|--------------------|--------------------------------|
//! | changes  | global, filtered per provider | `ChangeEvent`      | at-least-once, apply by key    |
//! | ring     | per provider                | `RingSignal`       | at most once, lost if no one listens |
//! | presence | per provider                | `ProviderPresence` | at most once                   |
//!
//! Publishing never waits on subscribers. Each subscriber has a bounded
//! buffer; one that falls behind skips the oldest values and receives a
//! [`Delivery::Lagged`] marker with the number it missed.

pub mod hub;

pub use hub::TopicHub;

use crate::models::{ChangeEvent, ProviderPresence, RingSignal};
use crate::observability::metrics;
use common::types::ProviderId;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

/// Channel labels for metrics.
pub const CHANNEL_CHANGES: &str = "changes";
pub const CHANNEL_RING: &str = "ring";
pub const CHANNEL_PRESENCE: &str = "presence";

/// One item of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<T> {
    /// A published value.
    Event(T),
    /// The subscriber fell behind and this many values were skipped.
    Lagged(u64),
}

/// Lazy, unbounded subscription. Dropping it unsubscribes.
pub type Subscription<T> = BoxStream<'static, Delivery<T>>;

/// Fan-out hub shared by the provider actors and the SSE handlers.
#[derive(Clone)]
pub struct NotificationBus {
    changes: broadcast::Sender<ChangeEvent>,
    rings: TopicHub<RingSignal>,
    presence: TopicHub<ProviderPresence>,
}

impl NotificationBus {
    /// Create a bus whose subscribers each buffer `capacity` values.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (changes, _) = broadcast::channel(capacity);
        Self {
            changes,
            rings: TopicHub::with_capacity(capacity),
            presence: TopicHub::with_capacity(capacity),
        }
    }

    /// Publish an entry change. Returns the number of live subscribers
    /// (across all providers) the event was handed to.
    pub fn publish_change(&self, event: ChangeEvent) -> usize {
        let provider_id = event.provider_id();
        let receivers = self.changes.send(event).unwrap_or(0);
        metrics::record_bus_published(CHANNEL_CHANGES);
        tracing::debug!(
            target: "queue.bus",
            provider_id = %provider_id,
            receivers = receivers,
            "Change event published"
        );
        receivers
    }

    /// Publish a ring signal to a provider's displays.
    pub async fn publish_ring(&self, signal: RingSignal) -> usize {
        let provider_id = signal.provider_id;
        let receivers = self.rings.publish(provider_id, signal).await;
        metrics::record_bus_published(CHANNEL_RING);
        if receivers == 0 {
            tracing::debug!(
                target: "queue.bus",
                provider_id = %provider_id,
                "Ring signal had no subscribers"
            );
        }
        receivers
    }

    /// Publish a provider's online flag.
    pub async fn publish_presence(&self, presence: ProviderPresence) -> usize {
        let receivers = self.presence.publish(presence.provider_id, presence).await;
        metrics::record_bus_published(CHANNEL_PRESENCE);
        receivers
    }

    /// Subscribe to change events of one provider.
    pub fn subscribe_changes(&self, provider_id: ProviderId) -> Subscription<ChangeEvent> {
        let rx = self.changes.subscribe();
        into_subscription(rx, CHANNEL_CHANGES)
            .filter(move |delivery| {
                let keep = match delivery {
                    Delivery::Event(event) => event.provider_id() == provider_id,
                    Delivery::Lagged(_) => true,
                };
                futures::future::ready(keep)
            })
            .boxed()
    }

    /// Subscribe to ring signals of one provider.
    pub async fn subscribe_ring(&self, provider_id: ProviderId) -> Subscription<RingSignal> {
        let rx = self.rings.subscribe(provider_id).await;
        into_subscription(rx, CHANNEL_RING)
    }

    /// Subscribe to presence updates of one provider.
    pub async fn subscribe_presence(
        &self,
        provider_id: ProviderId,
    ) -> Subscription<ProviderPresence> {
        let rx = self.presence.subscribe(provider_id).await;
        into_subscription(rx, CHANNEL_PRESENCE)
    }

    /// Drop per-provider channels nobody listens to anymore.
    pub async fn cleanup(&self) -> usize {
        self.rings.cleanup().await + self.presence.cleanup().await
    }
}

fn into_subscription<T>(rx: broadcast::Receiver<T>, channel: &'static str) -> Subscription<T>
where
    T: Clone + Send + 'static,
{
    BroadcastStream::new(rx)
        .map(move |result| match result {
            Ok(value) => Delivery::Event(value),
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                metrics::record_bus_dropped(channel, missed);
                tracing::warn!(
                    target: "queue.bus",
                    channel = channel,
                    missed = missed,
                    "Subscriber lagged, events dropped"
                );
                Delivery::Lagged(missed)
            }
        })
        .boxed()
}
