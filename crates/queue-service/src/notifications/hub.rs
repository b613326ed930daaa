//! Provider-keyed broadcast hub.
//!
//! Each provider gets its own bounded broadcast channel, created on first
//! subscribe. Publishing to a provider nobody listens to is a no-op, so
//! signals sent while no display is connected are simply lost.

use common::types::ProviderId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// In-process pub/sub keyed by provider. Cheap to clone.
#[derive(Clone)]
pub struct TopicHub<T> {
    channels: Arc<RwLock<HashMap<ProviderId, broadcast::Sender<T>>>>,
    capacity: usize,
}

impl<T: Clone + Send + 'static> TopicHub<T> {
    /// Create a hub whose channels buffer `capacity` values per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Publish to a provider's channel.
    ///
    /// Returns the number of subscribers the value was handed to; zero when
    /// nobody is connected.
    pub async fn publish(&self, topic: ProviderId, value: T) -> usize {
        let channels = self.channels.read().await;
        match channels.get(&topic) {
            // Err means every receiver is gone
            Some(tx) => tx.send(value).unwrap_or(0),
            None => 0,
        }
    }

    /// Subscribe to a provider's channel, creating it if needed.
    /// Only values published after this call are received.
    pub async fn subscribe(&self, topic: ProviderId) -> broadcast::Receiver<T> {
        let mut channels = self.channels.write().await;
        channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Remove channels with zero subscribers.
    pub async fn cleanup(&self) -> usize {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        before - channels.len()
    }

    /// Number of open channels.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}
