//! Queue store layer.
//!
//! [`QueueStore`] is the single source of truth for providers and entries.
//! Every mutating operation is atomic on its own: a failed call leaves no
//! partial state behind. Two implementations are provided:
//!
//! - [`memory::InMemoryQueueStore`]: process-local, used when no database is
//!   configured and by the test harness.
//! - [`postgres::PgQueueStore`]: sqlx/Postgres, row-locking transactions.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryQueueStore;
pub use postgres::PgQueueStore;

use crate::errors::QueueError;
use crate::models::{Advance, Entry, NewEntry, Provider};
use async_trait::async_trait;
use common::types::ProviderId;
use std::future::Future;
use std::time::Duration;

/// Durable storage for providers and their queues.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Check store connectivity.
    async fn ping(&self) -> Result<(), QueueError>;

    /// Return the provider with `contact`, creating it (offline) if unknown.
    async fn upsert_provider(&self, name: &str, contact: &str) -> Result<Provider, QueueError>;

    /// Look up a provider.
    async fn get_provider(&self, provider_id: ProviderId) -> Result<Option<Provider>, QueueError>;

    /// Set the provider's online flag unconditionally.
    async fn set_online(&self, provider_id: ProviderId, online: bool)
        -> Result<Provider, QueueError>;

    /// Insert a waiting entry with the next token number.
    ///
    /// Fails with `NotFound` for an unknown provider, `ProviderUnavailable`
    /// when the provider is offline, and `Duplicate` when the contact already
    /// holds a pending entry. The token counter only advances on success.
    async fn insert_entry(&self, new_entry: &NewEntry) -> Result<Entry, QueueError>;

    /// Close out the called entry and promote the lowest waiting token, as one
    /// transaction.
    async fn advance(&self, provider_id: ProviderId) -> Result<Advance, QueueError>;

    /// All entries of a provider ordered by token number ascending.
    async fn list_entries(&self, provider_id: ProviderId) -> Result<Vec<Entry>, QueueError>;

    /// Delete every entry of the provider and restart its token sequence.
    /// Returns the last snapshot of each deleted entry.
    async fn clear_entries(&self, provider_id: ProviderId) -> Result<Vec<Entry>, QueueError>;
}

/// Run a store operation under a deadline.
///
/// An elapsed deadline is reported as a store failure. The operation's
/// transaction is dropped with the future and rolls back unless its commit
/// had already been sent.
pub async fn with_deadline<T, F>(
    deadline: Duration,
    operation: &'static str,
    fut: F,
) -> Result<T, QueueError>
where
    F: Future<Output = Result<T, QueueError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                target: "queue.store",
                operation = operation,
                deadline_ms = deadline.as_millis() as u64,
                "Store operation timed out"
            );
            Err(QueueError::Store(format!(
                "{operation} timed out after {}ms",
                deadline.as_millis()
            )))
        }
    }
}

/// Fault-injecting store for testing failure paths.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

    /// Wraps an [`InMemoryQueueStore`] and fails or stalls selected operations.
    #[derive(Default)]
    pub struct FaultyStore {
        inner: InMemoryQueueStore,
        fail_ping: AtomicBool,
        fail_advance: AtomicBool,
        fail_clear: AtomicBool,
        delay_ms: AtomicU64,
        delay_after_advance_ms: AtomicU64,
        advance_calls: AtomicUsize,
    }

    impl FaultyStore {
        /// Create a store with no faults configured.
        pub fn new() -> Self {
            Self::default()
        }

        /// Make `ping` fail.
        pub fn fail_ping(&self, fail: bool) {
            self.fail_ping.store(fail, Ordering::SeqCst);
        }

        /// Make `advance` fail without touching state.
        pub fn fail_advance(&self, fail: bool) {
            self.fail_advance.store(fail, Ordering::SeqCst);
        }

        /// Make `clear_entries` fail without deleting anything.
        pub fn fail_clear(&self, fail: bool) {
            self.fail_clear.store(fail, Ordering::SeqCst);
        }

        /// Stall every mutating operation by `delay` before running it.
        pub fn set_delay(&self, delay: Duration) {
            self.delay_ms
                .store(delay.as_millis() as u64, Ordering::SeqCst);
        }

        /// Stall `advance` by `delay` after it has already been applied.
        pub fn set_delay_after_advance(&self, delay: Duration) {
            self.delay_after_advance_ms
                .store(delay.as_millis() as u64, Ordering::SeqCst);
        }

        /// Number of `advance` calls that reached the store.
        pub fn advance_calls(&self) -> usize {
            self.advance_calls.load(Ordering::SeqCst)
        }

        async fn stall(&self) {
            let delay_ms = self.delay_ms.load(Ordering::SeqCst);
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }

    #[async_trait]
    impl QueueStore for FaultyStore {
        async fn ping(&self) -> Result<(), QueueError> {
            if self.fail_ping.load(Ordering::SeqCst) {
                return Err(QueueError::Store("Mock store unreachable".to_string()));
            }
            self.inner.ping().await
        }

        async fn upsert_provider(&self, name: &str, contact: &str) -> Result<Provider, QueueError> {
            self.inner.upsert_provider(name, contact).await
        }

        async fn get_provider(
            &self,
            provider_id: ProviderId,
        ) -> Result<Option<Provider>, QueueError> {
            self.inner.get_provider(provider_id).await
        }

        async fn set_online(
            &self,
            provider_id: ProviderId,
            online: bool,
        ) -> Result<Provider, QueueError> {
            self.stall().await;
            self.inner.set_online(provider_id, online).await
        }

        async fn insert_entry(&self, new_entry: &NewEntry) -> Result<Entry, QueueError> {
            self.stall().await;
            self.inner.insert_entry(new_entry).await
        }

        async fn advance(&self, provider_id: ProviderId) -> Result<Advance, QueueError> {
            self.advance_calls.fetch_add(1, Ordering::SeqCst);
            self.stall().await;
            if self.fail_advance.load(Ordering::SeqCst) {
                return Err(QueueError::Store("Mock advance failure".to_string()));
            }
            let advance = self.inner.advance(provider_id).await?;
            let after_ms = self.delay_after_advance_ms.load(Ordering::SeqCst);
            if after_ms > 0 {
                tokio::time::sleep(Duration::from_millis(after_ms)).await;
            }
            Ok(advance)
        }

        async fn list_entries(&self, provider_id: ProviderId) -> Result<Vec<Entry>, QueueError> {
            self.inner.list_entries(provider_id).await
        }

        async fn clear_entries(&self, provider_id: ProviderId) -> Result<Vec<Entry>, QueueError> {
            self.stall().await;
            if self.fail_clear.load(Ordering::SeqCst) {
                return Err(QueueError::Store("Mock delete failure".to_string()));
            }
            self.inner.clear_entries(provider_id).await
        }
    }
}
