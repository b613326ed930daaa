//! Token allocation for new registrations.
//!
//! Input is validated and normalized here, before any store access. The store
//! assigns the token number in the same transaction as the insert, and the
//! provider actor serializes registrations for one provider on top of that.

use crate::errors::QueueError;
use crate::models::{Entry, NewEntry, RegisterRequest};
use crate::observability::metrics;
use crate::repositories::{with_deadline, QueueStore};
use common::types::ProviderId;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Validate a registration request and normalize it into a [`NewEntry`].
///
/// Names and contacts are trimmed so that `" 555 "` and `"555"` count as the
/// same holder.
pub fn prepare(provider_id: ProviderId, request: &RegisterRequest) -> Result<NewEntry, QueueError> {
    if let Err(reason) = request.validate() {
        metrics::record_registration("validation");
        return Err(QueueError::Validation(reason));
    }

    Ok(NewEntry {
        provider_id,
        holder_name: request.name.trim().to_string(),
        holder_contact: request.contact.trim().to_string(),
    })
}

/// Insert a waiting entry with the next token number.
#[instrument(skip_all, name = "queue.services.allocator", fields(provider_id = %new_entry.provider_id))]
pub async fn register(
    store: &dyn QueueStore,
    deadline: Duration,
    new_entry: &NewEntry,
) -> Result<Entry, QueueError> {
    match with_deadline(deadline, "insert_entry", store.insert_entry(new_entry)).await {
        Ok(entry) => {
            metrics::record_registration("success");
            info!(
                target: "queue.services.allocator",
                provider_id = %entry.provider_id,
                entry_id = %entry.id,
                token_number = entry.token_number,
                "Token allocated"
            );
            Ok(entry)
        }
        Err(e) => {
            metrics::record_registration(e.code());
            if e.is_expected() {
                info!(
                    target: "queue.services.allocator",
                    provider_id = %new_entry.provider_id,
                    reason = %e,
                    "Registration rejected"
                );
            } else {
                warn!(
                    target: "queue.services.allocator",
                    provider_id = %new_entry.provider_id,
                    error = %e,
                    "Registration failed"
                );
            }
            Err(e)
        }
    }
}
