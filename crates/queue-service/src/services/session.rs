//! Provider session lifecycle: online toggling and session termination.

use crate::errors::QueueError;
use crate::models::{ChangeEvent, EndSessionOutcome, Provider, ProviderPresence};
use crate::notifications::NotificationBus;
use crate::observability::metrics;
use crate::repositories::{with_deadline, QueueStore};
use common::types::ProviderId;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Set the provider's online flag and announce it on the presence channel.
#[instrument(skip_all, name = "queue.services.session.set_online", fields(provider_id = %provider_id, online = online))]
pub async fn set_online(
    store: &dyn QueueStore,
    bus: &NotificationBus,
    deadline: Duration,
    provider_id: ProviderId,
    online: bool,
) -> Result<Provider, QueueError> {
    let provider = with_deadline(deadline, "set_online", store.set_online(provider_id, online)).await?;

    bus.publish_presence(ProviderPresence {
        provider_id,
        is_online: provider.is_online,
    })
    .await;

    info!(
        target: "queue.services.session",
        provider_id = %provider_id,
        is_online = provider.is_online,
        "Provider presence changed"
    );
    Ok(provider)
}

/// End the provider's session: take it offline, then delete its queue.
///
/// The provider is offline before any entry is touched, so no registration
/// can slip in while the queue is being cleared. If deleting fails the
/// provider stays offline and the outcome lists the entries that remain.
#[instrument(skip_all, name = "queue.services.session.end_session", fields(provider_id = %provider_id))]
pub async fn end_session(
    store: &dyn QueueStore,
    bus: &NotificationBus,
    deadline: Duration,
    provider_id: ProviderId,
) -> Result<EndSessionOutcome, QueueError> {
    let provider = match set_online(store, bus, deadline, provider_id, false).await {
        Ok(provider) => provider,
        Err(e) => {
            metrics::record_session_ended("error");
            return Err(e);
        }
    };

    match with_deadline(deadline, "clear_entries", store.clear_entries(provider_id)).await {
        Ok(removed) => {
            for entry in &removed {
                bus.publish_change(ChangeEvent::removed(entry.clone()));
            }
            metrics::record_session_ended("complete");
            info!(
                target: "queue.services.session",
                provider_id = %provider_id,
                removed = removed.len(),
                "Session ended"
            );
            Ok(EndSessionOutcome {
                provider,
                removed,
                remaining: Vec::new(),
            })
        }
        Err(clear_error) => {
            warn!(
                target: "queue.services.session",
                provider_id = %provider_id,
                error = %clear_error,
                "Clearing queue failed, provider left offline"
            );

            let remaining =
                match with_deadline(deadline, "list_entries", store.list_entries(provider_id)).await
                {
                    Ok(entries) => entries.into_iter().map(|entry| entry.id).collect(),
                    Err(list_error) => {
                        error!(
                            target: "queue.services.session",
                            provider_id = %provider_id,
                            error = %list_error,
                            "Could not determine remaining entries"
                        );
                        metrics::record_session_ended("error");
                        return Err(clear_error);
                    }
                };

            metrics::record_session_ended("partial");
            Ok(EndSessionOutcome {
                provider,
                removed: Vec::new(),
                remaining,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{ChangeKind, NewEntry};
    use crate::notifications::Delivery;
    use crate::repositories::mock::FaultyStore;
    use crate::repositories::InMemoryQueueStore;
    use futures::StreamExt;

    const DEADLINE: Duration = Duration::from_secs(1);

    async fn seeded(store: &dyn QueueStore, holders: usize) -> ProviderId {
        let provider = store.upsert_provider("Dr. Rao", "rao@example.com").await.unwrap();
        store.set_online(provider.id, true).await.unwrap();
        for i in 0..holders {
            store
                .insert_entry(&NewEntry {
                    provider_id: provider.id,
                    holder_name: format!("Holder {i}"),
                    holder_contact: format!("c-{i}"),
                })
                .await
                .unwrap();
        }
        provider.id
    }

    #[tokio::test]
    async fn test_set_online_publishes_presence() {
        let store = InMemoryQueueStore::new();
        let bus = NotificationBus::new(8);
        let provider = store.upsert_provider("Dr. Rao", "rao@example.com").await.unwrap();
        let mut presence = bus.subscribe_presence(provider.id).await;

        let updated = set_online(&store, &bus, DEADLINE, provider.id, true).await.unwrap();
        assert!(updated.is_online);

        assert_eq!(
            presence.next().await.unwrap(),
            Delivery::Event(ProviderPresence {
                provider_id: provider.id,
                is_online: true,
            })
        );
    }

    #[tokio::test]
    async fn test_set_online_unknown_provider() {
        let store = InMemoryQueueStore::new();
        let bus = NotificationBus::new(8);

        let result = set_online(&store, &bus, DEADLINE, ProviderId::new(), true).await;
        assert!(matches!(result, Err(QueueError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_end_session_clears_and_goes_offline() {
        let store = InMemoryQueueStore::new();
        let bus = NotificationBus::new(8);
        let provider_id = seeded(&store, 2).await;
        let mut changes = bus.subscribe_changes(provider_id);

        let outcome = end_session(&store, &bus, DEADLINE, provider_id).await.unwrap();

        assert!(!outcome.provider.is_online);
        assert_eq!(outcome.removed.len(), 2);
        assert!(outcome.remaining.is_empty());
        assert!(store.list_entries(provider_id).await.unwrap().is_empty());

        for _ in 0..2 {
            match changes.next().await.unwrap() {
                Delivery::Event(event) => assert_eq!(event.kind, ChangeKind::Removed),
                Delivery::Lagged(n) => unreachable!("unexpected lag of {n}"),
            }
        }
    }

    #[tokio::test]
    async fn test_failed_clear_reports_remaining_and_stays_offline() {
        let store = FaultyStore::new();
        let bus = NotificationBus::new(8);
        let provider_id = seeded(&store, 3).await;
        store.fail_clear(true);

        let outcome = end_session(&store, &bus, DEADLINE, provider_id).await.unwrap();

        assert!(!outcome.provider.is_online);
        assert!(outcome.removed.is_empty());
        assert_eq!(outcome.remaining.len(), 3);

        let provider = store.get_provider(provider_id).await.unwrap().unwrap();
        assert!(!provider.is_online);
    }
}
