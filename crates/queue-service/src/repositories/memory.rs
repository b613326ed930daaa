//! In-memory queue store.
//!
//! A single `RwLock` guards all state, so each operation is trivially atomic.
//! Selected when `DATABASE_URL` is unset and used by the test harness.

use super::QueueStore;
use crate::errors::QueueError;
use crate::models::{Advance, Entry, EntryStatus, NewEntry, Provider};
use async_trait::async_trait;
use common::types::{EntryId, ProviderId};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug)]
struct ProviderRecord {
    provider: Provider,
    last_token: i64,
    /// Entries in token order. Tokens are only ever appended.
    entries: Vec<Entry>,
}

#[derive(Debug, Default)]
struct State {
    providers: HashMap<ProviderId, ProviderRecord>,
    by_contact: HashMap<String, ProviderId>,
}

/// Process-local [`QueueStore`].
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    state: RwLock<State>,
}

impl InMemoryQueueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(provider_id: ProviderId) -> QueueError {
    QueueError::NotFound(format!("Provider {provider_id} not found"))
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn upsert_provider(&self, name: &str, contact: &str) -> Result<Provider, QueueError> {
        let mut state = self.state.write().await;

        if let Some(existing) = state
            .by_contact
            .get(contact)
            .and_then(|id| state.providers.get(id))
        {
            return Ok(existing.provider.clone());
        }

        let provider = Provider {
            id: ProviderId::new(),
            name: name.to_string(),
            contact: contact.to_string(),
            is_online: false,
        };
        state.by_contact.insert(contact.to_string(), provider.id);
        state.providers.insert(
            provider.id,
            ProviderRecord {
                provider: provider.clone(),
                last_token: 0,
                entries: Vec::new(),
            },
        );
        Ok(provider)
    }

    async fn get_provider(&self, provider_id: ProviderId) -> Result<Option<Provider>, QueueError> {
        let state = self.state.read().await;
        Ok(state
            .providers
            .get(&provider_id)
            .map(|record| record.provider.clone()))
    }

    async fn set_online(
        &self,
        provider_id: ProviderId,
        online: bool,
    ) -> Result<Provider, QueueError> {
        let mut state = self.state.write().await;
        let record = state
            .providers
            .get_mut(&provider_id)
            .ok_or_else(|| not_found(provider_id))?;
        record.provider.is_online = online;
        Ok(record.provider.clone())
    }

    async fn insert_entry(&self, new_entry: &NewEntry) -> Result<Entry, QueueError> {
        let mut state = self.state.write().await;
        let record = state
            .providers
            .get_mut(&new_entry.provider_id)
            .ok_or_else(|| not_found(new_entry.provider_id))?;

        if !record.provider.is_online {
            return Err(QueueError::ProviderUnavailable(
                "Provider is not accepting registrations".to_string(),
            ));
        }

        let already_pending = record.entries.iter().any(|entry| {
            entry.holder_contact == new_entry.holder_contact && entry.status.is_pending()
        });
        if already_pending {
            return Err(QueueError::Duplicate(
                "Already registered with this provider".to_string(),
            ));
        }

        let token_number = record.last_token + 1;
        let entry = Entry {
            id: EntryId::new(),
            provider_id: new_entry.provider_id,
            holder_name: new_entry.holder_name.clone(),
            holder_contact: new_entry.holder_contact.clone(),
            token_number,
            status: EntryStatus::Waiting,
        };
        record.last_token = token_number;
        record.entries.push(entry.clone());
        Ok(entry)
    }

    async fn advance(&self, provider_id: ProviderId) -> Result<Advance, QueueError> {
        let mut state = self.state.write().await;
        let record = state
            .providers
            .get_mut(&provider_id)
            .ok_or_else(|| not_found(provider_id))?;

        let mut advance = Advance::default();

        if let Some(current) = record
            .entries
            .iter_mut()
            .find(|entry| entry.status == EntryStatus::Called)
        {
            current.status = EntryStatus::Done;
            advance.finished = Some(current.clone());
        }

        // Entries are kept in token order, so the first waiting one is next.
        if let Some(next) = record
            .entries
            .iter_mut()
            .find(|entry| entry.status == EntryStatus::Waiting)
        {
            next.status = EntryStatus::Called;
            advance.called = Some(next.clone());
        }

        Ok(advance)
    }

    async fn list_entries(&self, provider_id: ProviderId) -> Result<Vec<Entry>, QueueError> {
        let state = self.state.read().await;
        Ok(state
            .providers
            .get(&provider_id)
            .map(|record| record.entries.clone())
            .unwrap_or_default())
    }

    async fn clear_entries(&self, provider_id: ProviderId) -> Result<Vec<Entry>, QueueError> {
        let mut state = self.state.write().await;
        let record = state
            .providers
            .get_mut(&provider_id)
            .ok_or_else(|| not_found(provider_id))?;

        record.last_token = 0;
        Ok(std::mem::take(&mut record.entries))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn online_provider(store: &InMemoryQueueStore) -> ProviderId {
        let provider = store
            .upsert_provider("Dr. Rao", "rao@example.com")
            .await
            .unwrap();
        store.set_online(provider.id, true).await.unwrap();
        provider.id
    }

    fn new_entry(provider_id: ProviderId, name: &str, contact: &str) -> NewEntry {
        NewEntry {
            provider_id,
            holder_name: name.to_string(),
            holder_contact: contact.to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_provider_is_keyed_by_contact() {
        let store = InMemoryQueueStore::new();

        let first = store.upsert_provider("Dr. Rao", "rao@example.com").await.unwrap();
        let again = store.upsert_provider("Renamed", "rao@example.com").await.unwrap();
        let other = store.upsert_provider("Dr. Iyer", "iyer@example.com").await.unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(again.name, "Dr. Rao");
        assert!(!first.is_online);
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_tokens() {
        let store = InMemoryQueueStore::new();
        let provider_id = online_provider(&store).await;

        let alice = store
            .insert_entry(&new_entry(provider_id, "Alice", "111"))
            .await
            .unwrap();
        let bob = store
            .insert_entry(&new_entry(provider_id, "Bob", "222"))
            .await
            .unwrap();

        assert_eq!(alice.token_number, 1);
        assert_eq!(bob.token_number, 2);
        assert_eq!(alice.status, EntryStatus::Waiting);
    }

    #[tokio::test]
    async fn test_insert_rejects_offline_provider() {
        let store = InMemoryQueueStore::new();
        let provider = store.upsert_provider("Dr. Rao", "rao@example.com").await.unwrap();

        let result = store
            .insert_entry(&new_entry(provider.id, "Alice", "111"))
            .await;
        assert!(matches!(result, Err(QueueError::ProviderUnavailable(_))));
    }

    #[tokio::test]
    async fn test_insert_rejects_unknown_provider() {
        let store = InMemoryQueueStore::new();
        let result = store
            .insert_entry(&new_entry(ProviderId::new(), "Alice", "111"))
            .await;
        assert!(matches!(result, Err(QueueError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_does_not_consume_a_token() {
        let store = InMemoryQueueStore::new();
        let provider_id = online_provider(&store).await;

        store
            .insert_entry(&new_entry(provider_id, "Alice", "111"))
            .await
            .unwrap();
        let dup = store
            .insert_entry(&new_entry(provider_id, "Alice again", "111"))
            .await;
        assert!(matches!(dup, Err(QueueError::Duplicate(_))));

        let bob = store
            .insert_entry(&new_entry(provider_id, "Bob", "222"))
            .await
            .unwrap();
        assert_eq!(bob.token_number, 2);
    }

    #[tokio::test]
    async fn test_advance_walks_the_queue() {
        let store = InMemoryQueueStore::new();
        let provider_id = online_provider(&store).await;
        store
            .insert_entry(&new_entry(provider_id, "Alice", "111"))
            .await
            .unwrap();
        store
            .insert_entry(&new_entry(provider_id, "Bob", "222"))
            .await
            .unwrap();

        let first = store.advance(provider_id).await.unwrap();
        assert!(first.finished.is_none());
        assert_eq!(first.called.as_ref().unwrap().holder_name, "Alice");

        let second = store.advance(provider_id).await.unwrap();
        assert_eq!(second.finished.as_ref().unwrap().holder_name, "Alice");
        assert_eq!(second.finished.as_ref().unwrap().status, EntryStatus::Done);
        assert_eq!(second.called.as_ref().unwrap().holder_name, "Bob");

        let third = store.advance(provider_id).await.unwrap();
        assert_eq!(third.finished.as_ref().unwrap().holder_name, "Bob");
        assert!(third.called.is_none());

        let empty = store.advance(provider_id).await.unwrap();
        assert_eq!(empty, Advance::default());
    }

    #[tokio::test]
    async fn test_done_entry_frees_contact_for_new_registration() {
        let store = InMemoryQueueStore::new();
        let provider_id = online_provider(&store).await;
        store
            .insert_entry(&new_entry(provider_id, "Alice", "111"))
            .await
            .unwrap();
        store.advance(provider_id).await.unwrap();
        store.advance(provider_id).await.unwrap();

        let again = store
            .insert_entry(&new_entry(provider_id, "Alice", "111"))
            .await
            .unwrap();
        assert_eq!(again.token_number, 2);
    }

    #[tokio::test]
    async fn test_clear_entries_restarts_sequence() {
        let store = InMemoryQueueStore::new();
        let provider_id = online_provider(&store).await;
        store
            .insert_entry(&new_entry(provider_id, "Alice", "111"))
            .await
            .unwrap();
        store
            .insert_entry(&new_entry(provider_id, "Bob", "222"))
            .await
            .unwrap();

        let removed = store.clear_entries(provider_id).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(store.list_entries(provider_id).await.unwrap().is_empty());

        let fresh = store
            .insert_entry(&new_entry(provider_id, "Carol", "333"))
            .await
            .unwrap();
        assert_eq!(fresh.token_number, 1);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_have_no_gaps() {
        let store = Arc::new(InMemoryQueueStore::new());
        let provider_id = online_provider(&store).await;

        let mut handles = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .insert_entry(&new_entry(provider_id, "Holder", &format!("contact-{i}")))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let tokens: Vec<i64> = store
            .list_entries(provider_id)
            .await
            .unwrap()
            .iter()
            .map(|entry| entry.token_number)
            .collect();
        assert_eq!(tokens, (1..=50).collect::<Vec<i64>>());
    }
}
