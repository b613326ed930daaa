//! Postgres queue store.
//!
//! # Atomicity
//!
//! - Registration and call-next lock the provider row (`SELECT ... FOR UPDATE`)
//!   so concurrent writers for one provider are serialized even across
//!   service instances.
//! - The token counter lives on the provider row and advances in the same
//!   transaction as the entry insert, so a failed insert never leaves a gap.
//! - Partial unique indexes back up the pending-contact and single-called
//!   rules; violations surface as `Duplicate` or `Concurrency`.
//! - All queries use parameterized statements.

use super::QueueStore;
use crate::errors::QueueError;
use crate::models::{Advance, Entry, EntryStatus, NewEntry, Provider};
use crate::observability::metrics;
use async_trait::async_trait;
use common::types::{EntryId, ProviderId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Instant;
use tracing::instrument;

const ENTRY_COLUMNS: &str =
    "entry_id, provider_id, holder_name, holder_contact, token_number, status";

/// sqlx-backed [`QueueStore`].
#[derive(Debug, Clone)]
pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    /// Wrap an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Borrow the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_row_to_provider(row: &PgRow) -> Result<Provider, QueueError> {
    Ok(Provider {
        id: ProviderId(row.try_get("provider_id")?),
        name: row.try_get("name")?,
        contact: row.try_get("contact")?,
        is_online: row.try_get("is_online")?,
    })
}

fn map_row_to_entry(row: &PgRow) -> Result<Entry, QueueError> {
    let status: String = row.try_get("status")?;
    Ok(Entry {
        id: EntryId(row.try_get("entry_id")?),
        provider_id: ProviderId(row.try_get("provider_id")?),
        holder_name: row.try_get("holder_name")?,
        holder_contact: row.try_get("holder_contact")?,
        token_number: row.try_get("token_number")?,
        status: status.parse::<EntryStatus>().map_err(QueueError::Store)?,
    })
}

/// Record the query outcome and pass the result through.
fn observe<T>(operation: &str, start: Instant, result: Result<T, QueueError>) -> Result<T, QueueError> {
    let status = match &result {
        Ok(_) => "success",
        Err(e) if e.is_expected() => "rejected",
        Err(_) => "error",
    };
    metrics::record_store_query(operation, status, start.elapsed());
    result
}

/// Lock the provider row for the rest of the transaction.
/// Returns `(is_online, last_token)`.
async fn lock_provider(
    tx: &mut Transaction<'_, Postgres>,
    provider_id: ProviderId,
) -> Result<(bool, i64), QueueError> {
    let row = sqlx::query(
        r#"
        SELECT is_online, last_token
        FROM providers
        WHERE provider_id = $1
        FOR UPDATE
        "#,
    )
    .bind(provider_id.0)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| QueueError::NotFound(format!("Provider {provider_id} not found")))?;

    Ok((row.try_get("is_online")?, row.try_get("last_token")?))
}

impl PgQueueStore {
    async fn insert_entry_tx(&self, new_entry: &NewEntry) -> Result<Entry, QueueError> {
        let mut tx = self.pool.begin().await?;

        let (is_online, _) = lock_provider(&mut tx, new_entry.provider_id).await?;
        if !is_online {
            return Err(QueueError::ProviderUnavailable(
                "Provider is not accepting registrations".to_string(),
            ));
        }

        let pending = sqlx::query(
            r#"
            SELECT 1 AS present
            FROM entries
            WHERE provider_id = $1
              AND holder_contact = $2
              AND status IN ('waiting', 'called')
            LIMIT 1
            "#,
        )
        .bind(new_entry.provider_id.0)
        .bind(&new_entry.holder_contact)
        .fetch_optional(&mut *tx)
        .await?;
        if pending.is_some() {
            return Err(QueueError::Duplicate(
                "Already registered with this provider".to_string(),
            ));
        }

        let token_row = sqlx::query(
            r#"
            UPDATE providers
            SET last_token = last_token + 1, updated_at = NOW()
            WHERE provider_id = $1
            RETURNING last_token
            "#,
        )
        .bind(new_entry.provider_id.0)
        .fetch_one(&mut *tx)
        .await?;
        let token_number: i64 = token_row.try_get("last_token")?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO entries (provider_id, holder_name, holder_contact, token_number, status)
            VALUES ($1, $2, $3, $4, 'waiting')
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(new_entry.provider_id.0) // $1
        .bind(&new_entry.holder_name) // $2
        .bind(&new_entry.holder_contact) // $3
        .bind(token_number) // $4
        .fetch_one(&mut *tx)
        .await?;
        let entry = map_row_to_entry(&row)?;

        tx.commit().await?;
        Ok(entry)
    }

    async fn advance_tx(&self, provider_id: ProviderId) -> Result<Advance, QueueError> {
        let mut tx = self.pool.begin().await?;
        lock_provider(&mut tx, provider_id).await?;

        let finished = sqlx::query(&format!(
            r#"
            UPDATE entries
            SET status = 'done', updated_at = NOW()
            WHERE provider_id = $1 AND status = 'called'
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(provider_id.0)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| map_row_to_entry(&row))
        .transpose()?;

        let called = sqlx::query(&format!(
            r#"
            UPDATE entries
            SET status = 'called', updated_at = NOW()
            WHERE entry_id = (
                SELECT entry_id
                FROM entries
                WHERE provider_id = $1 AND status = 'waiting'
                ORDER BY token_number ASC
                LIMIT 1
                FOR UPDATE
            )
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(provider_id.0)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| map_row_to_entry(&row))
        .transpose()?;

        tx.commit().await?;
        Ok(Advance { finished, called })
    }

    async fn clear_entries_tx(&self, provider_id: ProviderId) -> Result<Vec<Entry>, QueueError> {
        let mut tx = self.pool.begin().await?;
        lock_provider(&mut tx, provider_id).await?;

        let rows = sqlx::query(&format!(
            r#"
            DELETE FROM entries
            WHERE provider_id = $1
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(provider_id.0)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE providers
            SET last_token = 0, updated_at = NOW()
            WHERE provider_id = $1
            "#,
        )
        .bind(provider_id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut removed = rows
            .iter()
            .map(map_row_to_entry)
            .collect::<Result<Vec<_>, _>>()?;
        removed.sort_by_key(|entry| entry.token_number);
        Ok(removed)
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    #[instrument(skip_all, name = "queue.store.ping")]
    async fn ping(&self) -> Result<(), QueueError> {
        let start = Instant::now();
        let result = sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(QueueError::from);
        observe("ping", start, result)
    }

    #[instrument(skip_all, name = "queue.store.upsert_provider")]
    async fn upsert_provider(&self, name: &str, contact: &str) -> Result<Provider, QueueError> {
        let start = Instant::now();

        // The no-op update makes RETURNING yield the existing row on conflict.
        let result = sqlx::query(
            r#"
            INSERT INTO providers (name, contact)
            VALUES ($1, $2)
            ON CONFLICT (contact) DO UPDATE SET contact = EXCLUDED.contact
            RETURNING provider_id, name, contact, is_online
            "#,
        )
        .bind(name)
        .bind(contact)
        .fetch_one(&self.pool)
        .await
        .map_err(QueueError::from)
        .and_then(|row| map_row_to_provider(&row));

        observe("upsert_provider", start, result)
    }

    #[instrument(skip_all, name = "queue.store.get_provider", fields(provider_id = %provider_id))]
    async fn get_provider(&self, provider_id: ProviderId) -> Result<Option<Provider>, QueueError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            SELECT provider_id, name, contact, is_online
            FROM providers
            WHERE provider_id = $1
            "#,
        )
        .bind(provider_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::from)
        .and_then(|row| row.as_ref().map(map_row_to_provider).transpose());

        observe("get_provider", start, result)
    }

    #[instrument(skip_all, name = "queue.store.set_online", fields(provider_id = %provider_id))]
    async fn set_online(
        &self,
        provider_id: ProviderId,
        online: bool,
    ) -> Result<Provider, QueueError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE providers
            SET is_online = $2, updated_at = NOW()
            WHERE provider_id = $1
            RETURNING provider_id, name, contact, is_online
            "#,
        )
        .bind(provider_id.0)
        .bind(online)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::from)
        .and_then(|row| {
            row.as_ref()
                .map(map_row_to_provider)
                .transpose()?
                .ok_or_else(|| QueueError::NotFound(format!("Provider {provider_id} not found")))
        });

        observe("set_online", start, result)
    }

    #[instrument(skip_all, name = "queue.store.insert_entry", fields(provider_id = %new_entry.provider_id))]
    async fn insert_entry(&self, new_entry: &NewEntry) -> Result<Entry, QueueError> {
        let start = Instant::now();
        let result = self.insert_entry_tx(new_entry).await;
        observe("insert_entry", start, result)
    }

    #[instrument(skip_all, name = "queue.store.advance", fields(provider_id = %provider_id))]
    async fn advance(&self, provider_id: ProviderId) -> Result<Advance, QueueError> {
        let start = Instant::now();
        let result = self.advance_tx(provider_id).await;
        observe("advance", start, result)
    }

    #[instrument(skip_all, name = "queue.store.list_entries", fields(provider_id = %provider_id))]
    async fn list_entries(&self, provider_id: ProviderId) -> Result<Vec<Entry>, QueueError> {
        let start = Instant::now();
        let result = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM entries
            WHERE provider_id = $1
            ORDER BY token_number ASC
            "#
        ))
        .bind(provider_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(QueueError::from)
        .and_then(|rows| rows.iter().map(map_row_to_entry).collect());

        observe("list_entries", start, result)
    }

    #[instrument(skip_all, name = "queue.store.clear_entries", fields(provider_id = %provider_id))]
    async fn clear_entries(&self, provider_id: ProviderId) -> Result<Vec<Entry>, QueueError> {
        let start = Instant::now();
        let result = self.clear_entries_tx(provider_id).await;
        observe("clear_entries", start, result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn online_provider(store: &PgQueueStore, contact: &str) -> ProviderId {
        let provider = store.upsert_provider("Dr. Rao", contact).await.unwrap();
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

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_scenario_against_postgres(pool: PgPool) {
        let store = PgQueueStore::new(pool);
        let provider_id = online_provider(&store, "rao@example.com").await;

        let alice = store
            .insert_entry(&new_entry(provider_id, "Alice", "111"))
            .await
            .unwrap();
        let bob = store
            .insert_entry(&new_entry(provider_id, "Bob", "222"))
            .await
            .unwrap();
        assert_eq!((alice.token_number, bob.token_number), (1, 2));

        let dup = store
            .insert_entry(&new_entry(provider_id, "Alice", "111"))
            .await;
        assert!(matches!(dup, Err(QueueError::Duplicate(_))));

        let first = store.advance(provider_id).await.unwrap();
        assert_eq!(first.called.unwrap().id, alice.id);

        let second = store.advance(provider_id).await.unwrap();
        assert_eq!(second.finished.unwrap().id, alice.id);
        assert_eq!(second.called.unwrap().id, bob.id);

        let third = store.advance(provider_id).await.unwrap();
        assert_eq!(third.finished.unwrap().status, EntryStatus::Done);
        assert!(third.called.is_none());
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_offline_and_unknown_provider(pool: PgPool) {
        let store = PgQueueStore::new(pool);
        let provider = store
            .upsert_provider("Dr. Iyer", "iyer@example.com")
            .await
            .unwrap();
        assert!(!provider.is_online);

        let offline = store
            .insert_entry(&new_entry(provider.id, "Alice", "111"))
            .await;
        assert!(matches!(offline, Err(QueueError::ProviderUnavailable(_))));

        let unknown = store.advance(ProviderId::new()).await;
        assert!(matches!(unknown, Err(QueueError::NotFound(_))));
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_concurrent_inserts_have_no_gaps(pool: PgPool) {
        let store = Arc::new(PgQueueStore::new(pool));
        let provider_id = online_provider(&store, "rao@example.com").await;

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .insert_entry(&new_entry(provider_id, "Holder", &format!("c-{i}")))
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
        assert_eq!(tokens, (1..=20).collect::<Vec<i64>>());
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_concurrent_advance_keeps_single_called_entry(pool: PgPool) {
        let store = Arc::new(PgQueueStore::new(pool));
        let provider_id = online_provider(&store, "rao@example.com").await;
        for i in 0..20 {
            store
                .insert_entry(&new_entry(provider_id, "Holder", &format!("c-{i}")))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.advance(provider_id).await }));
        }

        let mut called = Vec::new();
        for handle in handles {
            let advance = handle.await.unwrap().unwrap();
            called.push(advance.called.unwrap().token_number);
        }
        called.sort_unstable();
        assert_eq!(called, (1..=10).collect::<Vec<i64>>());

        let entries = store.list_entries(provider_id).await.unwrap();
        let count = |status: EntryStatus| entries.iter().filter(|e| e.status == status).count();
        assert_eq!(count(EntryStatus::Called), 1);
        assert_eq!(count(EntryStatus::Done), 9);
        assert_eq!(count(EntryStatus::Waiting), 10);
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_clear_entries_restarts_sequence(pool: PgPool) {
        let store = PgQueueStore::new(pool);
        let provider_id = online_provider(&store, "rao@example.com").await;
        store
            .insert_entry(&new_entry(provider_id, "Alice", "111"))
            .await
            .unwrap();

        let removed = store.clear_entries(provider_id).await.unwrap();
        assert_eq!(removed.len(), 1);

        let fresh = store
            .insert_entry(&new_entry(provider_id, "Bob", "222"))
            .await
            .unwrap();
        assert_eq!(fresh.token_number, 1);
    }
}
