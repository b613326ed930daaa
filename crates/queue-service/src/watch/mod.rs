//! Now-serving view: the currently called entry of one provider, kept fresh
//! for passive displays.
//!
//! The view is a cache. It is updated from change events (applied
//! idempotently by entry id and status) and reconciled against the store:
//!
//! - once when the watch starts,
//! - whenever an event does not itself say who is called now (an entry
//!   finished or was removed, or the subscription lagged),
//! - and periodically, so a missed event can never leave a display stale for
//!   longer than one interval.
//!
//! The bus subscription is opened before the initial read, so no change that
//! commits after the read can be missed.

use crate::models::{ChangeEvent, Entry, EntryStatus};
use crate::notifications::{Delivery, NotificationBus};
use crate::repositories::{with_deadline, QueueStore};
use common::types::{EntryId, ProviderId};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Buffered snapshots per watcher before the watcher waits on its consumer.
const WATCH_BUFFER: usize = 16;

/// Snapshot of a provider's called slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowServing {
    pub provider_id: ProviderId,
    /// `None` when nobody is being called.
    pub entry: Option<Entry>,
}

/// What applying an event did to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The called slot changed.
    Changed,
    /// Nothing new (duplicate or stale event).
    Unchanged,
    /// The event does not say who is called now; re-read the store.
    NeedsRead,
}

/// Idempotent cache of the called slot.
#[derive(Debug, Default)]
pub struct CalledSlot {
    current: Option<Entry>,
    /// Entries seen leaving the called state since the last store read.
    /// A late `called` event for one of these is stale.
    retired: HashSet<EntryId>,
}

impl CalledSlot {
    /// Currently called entry.
    pub fn current(&self) -> Option<&Entry> {
        self.current.as_ref()
    }

    /// Apply one change event.
    pub fn apply(&mut self, event: &ChangeEvent) -> Applied {
        let entry = &event.entry;

        if event.is_call() {
            if self.retired.contains(&entry.id) {
                return Applied::Unchanged;
            }
            match &self.current {
                Some(current) if current.id == entry.id => Applied::Unchanged,
                // Tokens grow within a session, so an older call is a redelivery.
                Some(current) if current.token_number > entry.token_number => {
                    Applied::Unchanged
                }
                _ => {
                    self.current = Some(entry.clone());
                    Applied::Changed
                }
            }
        } else {
            self.retired.insert(entry.id);
            if self.current.as_ref().map(|c| c.id) == Some(entry.id) {
                self.current = None;
            }
            Applied::NeedsRead
        }
    }

    /// Replace the view with what the store says. Returns whether it changed.
    pub fn reconcile(&mut self, entries: &[Entry]) -> bool {
        let called = entries
            .iter()
            .find(|entry| entry.status == EntryStatus::Called)
            .cloned();
        self.retired.clear();

        if called == self.current {
            false
        } else {
            self.current = called;
            true
        }
    }
}

/// Watch a provider's called slot.
///
/// Yields the initial snapshot, then one snapshot per change. The background
/// task ends when the stream is dropped, the bus closes, or `cancel` fires.
pub fn now_serving(
    store: Arc<dyn QueueStore>,
    bus: &NotificationBus,
    provider_id: ProviderId,
    reconcile_interval: Duration,
    store_timeout: Duration,
    cancel: CancellationToken,
) -> impl Stream<Item = NowServing> + Send + 'static {
    let (tx, rx) = mpsc::channel(WATCH_BUFFER);
    let changes = bus.subscribe_changes(provider_id);

    tokio::spawn(async move {
        let mut watcher = Watcher {
            store,
            provider_id,
            store_timeout,
            slot: CalledSlot::default(),
            tx,
        };
        watcher.run(changes, reconcile_interval, cancel).await;
    });

    ReceiverStream::new(rx)
}

struct Watcher {
    store: Arc<dyn QueueStore>,
    provider_id: ProviderId,
    store_timeout: Duration,
    slot: CalledSlot,
    tx: mpsc::Sender<NowServing>,
}

impl Watcher {
    async fn run(
        &mut self,
        mut changes: crate::notifications::Subscription<ChangeEvent>,
        reconcile_interval: Duration,
        cancel: CancellationToken,
    ) {
        self.read().await;
        if !self.emit().await {
            return;
        }

        let mut ticker = tokio::time::interval(reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and the initial read is done.
        ticker.tick().await;

        loop {
            let changed = tokio::select! {
                () = cancel.cancelled() => break,
                () = self.tx.closed() => break,
                _ = ticker.tick() => self.read().await,
                delivery = changes.next() => match delivery {
                    None => break,
                    Some(Delivery::Lagged(_)) => self.read().await,
                    Some(Delivery::Event(event)) => {
                        let before = self.slot.current().map(|entry| entry.id);
                        match self.slot.apply(&event) {
                            Applied::Changed => true,
                            Applied::Unchanged => false,
                            Applied::NeedsRead => {
                                self.read().await;
                                self.slot.current().map(|entry| entry.id) != before
                            }
                        }
                    }
                },
            };

            if changed && !self.emit().await {
                break;
            }
        }

        debug!(
            target: "queue.watch",
            provider_id = %self.provider_id,
            "Now-serving watcher stopped"
        );
    }

    /// Reconcile against the store. A failed read keeps the cached view.
    async fn read(&mut self) -> bool {
        let result = with_deadline(
            self.store_timeout,
            "list_entries",
            self.store.list_entries(self.provider_id),
        )
        .await;

        match result {
            Ok(entries) => self.slot.reconcile(&entries),
            Err(e) => {
                warn!(
                    target: "queue.watch",
                    provider_id = %self.provider_id,
                    error = %e,
                    "Reconciling read failed, keeping cached view"
                );
                false
            }
        }
    }

    /// Send the current snapshot. Returns false once the consumer is gone.
    async fn emit(&self) -> bool {
        let snapshot = NowServing {
            provider_id: self.provider_id,
            entry: self.slot.current().cloned(),
        };
        self.tx.send(snapshot).await.is_ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::NewEntry;
    use crate::repositories::InMemoryQueueStore;
    use crate::services::scheduler;

    fn entry(token_number: i64, status: EntryStatus) -> Entry {
        Entry {
            id: EntryId::new(),
            provider_id: ProviderId::new(),
            holder_name: format!("Holder {token_number}"),
            holder_contact: format!("c-{token_number}"),
            token_number,
            status,
        }
    }

    #[test]
    fn test_apply_call_is_idempotent() {
        let mut slot = CalledSlot::default();
        let called = ChangeEvent::status_changed(entry(1, EntryStatus::Called));

        assert_eq!(slot.apply(&called), Applied::Changed);
        assert_eq!(slot.apply(&called), Applied::Unchanged);
        assert_eq!(slot.current().unwrap().token_number, 1);
    }

    #[test]
    fn test_apply_ignores_redelivered_older_call() {
        let mut slot = CalledSlot::default();
        let first = entry(1, EntryStatus::Called);
        let second = entry(2, EntryStatus::Called);

        slot.apply(&ChangeEvent::status_changed(first.clone()));
        slot.apply(&ChangeEvent::status_changed(second.clone()));
        assert_eq!(
            slot.apply(&ChangeEvent::status_changed(first)),
            Applied::Unchanged
        );
        assert_eq!(slot.current().unwrap().id, second.id);
    }

    #[test]
    fn test_apply_done_clears_slot_and_requests_read() {
        let mut slot = CalledSlot::default();
        let mut alice = entry(1, EntryStatus::Called);
        slot.apply(&ChangeEvent::status_changed(alice.clone()));

        alice.status = EntryStatus::Done;
        assert_eq!(
            slot.apply(&ChangeEvent::status_changed(alice.clone())),
            Applied::NeedsRead
        );
        assert!(slot.current().is_none());

        // A late duplicate of the earlier call must not resurrect it.
        alice.status = EntryStatus::Called;
        assert_eq!(
            slot.apply(&ChangeEvent::status_changed(alice)),
            Applied::Unchanged
        );
    }

    #[test]
    fn test_reconcile_follows_store() {
        let mut slot = CalledSlot::default();
        let waiting = entry(2, EntryStatus::Waiting);
        let called = entry(1, EntryStatus::Called);

        assert!(slot.reconcile(&[called.clone(), waiting.clone()]));
        assert_eq!(slot.current().unwrap().id, called.id);
        assert!(!slot.reconcile(&[called, waiting.clone()]));
        assert!(slot.reconcile(&[waiting]));
        assert!(slot.current().is_none());
    }

    async fn seeded(store: &InMemoryQueueStore, holders: &[&str]) -> ProviderId {
        let provider = store.upsert_provider("Dr. Rao", "rao@example.com").await.unwrap();
        store.set_online(provider.id, true).await.unwrap();
        for (i, name) in holders.iter().enumerate() {
            store
                .insert_entry(&NewEntry {
                    provider_id: provider.id,
                    holder_name: (*name).to_string(),
                    holder_contact: format!("c-{i}"),
                })
                .await
                .unwrap();
        }
        provider.id
    }

    async fn next_snapshot(stream: &mut (impl Stream<Item = NowServing> + Unpin)) -> NowServing {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("watch stalled")
            .expect("watch ended")
    }

    #[tokio::test]
    async fn test_watch_follows_call_next() {
        let store = Arc::new(InMemoryQueueStore::new());
        let bus = NotificationBus::new(16);
        let provider_id = seeded(&store, &["Alice", "Bob"]).await;

        let mut watch = Box::pin(now_serving(
            store.clone(),
            &bus,
            provider_id,
            Duration::from_secs(60),
            Duration::from_secs(1),
            CancellationToken::new(),
        ));

        assert!(next_snapshot(&mut watch).await.entry.is_none());

        scheduler::call_next(store.as_ref(), &bus, Duration::from_secs(1), provider_id)
            .await
            .unwrap();
        let snapshot = next_snapshot(&mut watch).await;
        assert_eq!(snapshot.entry.unwrap().holder_name, "Alice");

        scheduler::call_next(store.as_ref(), &bus, Duration::from_secs(1), provider_id)
            .await
            .unwrap();
        let mut latest = next_snapshot(&mut watch).await;
        // Alice's `done` may surface as an empty slot before Bob's call lands.
        if latest.entry.is_none() {
            latest = next_snapshot(&mut watch).await;
        }
        assert_eq!(latest.entry.unwrap().holder_name, "Bob");
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_read_catches_unpublished_change() {
        let store = Arc::new(InMemoryQueueStore::new());
        let bus = NotificationBus::new(16);
        let provider_id = seeded(&store, &["Alice"]).await;

        let mut watch = Box::pin(now_serving(
            store.clone(),
            &bus,
            provider_id,
            Duration::from_secs(5),
            Duration::from_secs(1),
            CancellationToken::new(),
        ));
        assert!(next_snapshot(&mut watch).await.entry.is_none());

        // Advance the store directly, bypassing the bus.
        store.advance(provider_id).await.unwrap();

        let snapshot = tokio::time::timeout(Duration::from_secs(10), watch.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.entry.unwrap().holder_name, "Alice");
    }

    #[tokio::test]
    async fn test_watch_stops_on_cancel() {
        let store = Arc::new(InMemoryQueueStore::new());
        let bus = NotificationBus::new(16);
        let provider_id = seeded(&store, &[]).await;
        let cancel = CancellationToken::new();

        let mut watch = Box::pin(now_serving(
            store,
            &bus,
            provider_id,
            Duration::from_secs(60),
            Duration::from_secs(1),
            cancel.clone(),
        ));
        next_snapshot(&mut watch).await;

        cancel.cancel();
        let ended = tokio::time::timeout(Duration::from_secs(1), watch.next())
            .await
            .unwrap();
        assert!(ended.is_none());
    }
}
