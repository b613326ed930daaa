//! Queue service models.
//!
//! Contains the store-facing data types (providers, entries), the events
//! carried by the notification bus, and the HTTP request/response bodies.

use chrono::{DateTime, Utc};
use common::types::{EntryId, ProviderId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Store Models
// ============================================================================

/// Entry status enumeration.
///
/// Status only moves forward: `Waiting -> Called -> Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Registered and waiting to be called.
    Waiting,

    /// Currently being served. At most one per provider.
    Called,

    /// Served and closed out.
    Done,
}

impl EntryStatus {
    /// Returns the string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Waiting => "waiting",
            EntryStatus::Called => "called",
            EntryStatus::Done => "done",
        }
    }

    /// Whether this entry still holds a place in the queue.
    pub fn is_pending(&self) -> bool {
        matches!(self, EntryStatus::Waiting | EntryStatus::Called)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: EntryStatus) -> bool {
        matches!(
            (self, next),
            (EntryStatus::Waiting, EntryStatus::Called) | (EntryStatus::Called, EntryStatus::Done)
        )
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(EntryStatus::Waiting),
            "called" => Ok(EntryStatus::Called),
            "done" => Ok(EntryStatus::Done),
            other => Err(format!("unknown entry status '{other}'")),
        }
    }
}

/// A provider running a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    /// Stable provider identifier.
    pub id: ProviderId,

    /// Display name.
    pub name: String,

    /// Unique contact (login identity).
    pub contact: String,

    /// Whether the provider is accepting registrations.
    pub is_online: bool,
}

/// One queued participant ("token").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Store-assigned entry identifier.
    pub id: EntryId,

    /// Owning provider.
    pub provider_id: ProviderId,

    /// Name of the person holding the token.
    pub holder_name: String,

    /// Contact of the person holding the token.
    pub holder_contact: String,

    /// Sequential token number, unique per provider.
    pub token_number: i64,

    /// Current status.
    pub status: EntryStatus,
}

/// A validated registration ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub provider_id: ProviderId,
    pub holder_name: String,
    pub holder_contact: String,
}

/// Result of one committed call-next transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advance {
    /// The previously called entry, now `done`.
    pub finished: Option<Entry>,

    /// The newly called entry, if any entry was waiting.
    pub called: Option<Entry>,
}

/// Result of ending a provider's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndSessionOutcome {
    /// Provider state after the session ended (always offline).
    pub provider: Provider,

    /// Entries that were deleted (last snapshot before removal).
    pub removed: Vec<Entry>,

    /// Entries that could not be deleted and still exist.
    pub remaining: Vec<EntryId>,
}

// ============================================================================
// Notification Models
// ============================================================================

/// What happened to the entry carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The entry's status moved forward.
    StatusChanged,

    /// The entry was deleted by session termination.
    Removed,
}

/// Notification of an entry mutation, carrying the post-mutation snapshot.
///
/// Delivery is at-least-once; consumers apply by [`ChangeEvent::key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub entry: Entry,
}

impl ChangeEvent {
    /// Status change of `entry`.
    pub fn status_changed(entry: Entry) -> Self {
        Self {
            kind: ChangeKind::StatusChanged,
            entry,
        }
    }

    /// Removal of `entry`.
    pub fn removed(entry: Entry) -> Self {
        Self {
            kind: ChangeKind::Removed,
            entry,
        }
    }

    /// Owning provider of the changed entry.
    pub fn provider_id(&self) -> ProviderId {
        self.entry.provider_id
    }

    /// Idempotency key: applying the same key twice has no further effect.
    pub fn key(&self) -> (EntryId, EntryStatus, ChangeKind) {
        (self.entry.id, self.entry.status, self.kind)
    }

    /// Whether this event carries a newly called entry. Every other
    /// transition requires a fresh read to learn the current called slot.
    pub fn is_call(&self) -> bool {
        self.kind == ChangeKind::StatusChanged && self.entry.status == EntryStatus::Called
    }
}

/// Ephemeral attention pulse for a provider's displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSignal {
    pub provider_id: ProviderId,
    pub sent_at: DateTime<Utc>,
}

/// Provider metadata update published when the online flag flips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPresence {
    pub provider_id: ProviderId,
    pub is_online: bool,
}

// ============================================================================
// HTTP API Models
// ============================================================================

/// Maximum length for holder and provider names.
pub const MAX_NAME_LENGTH: usize = 100;

/// Maximum length for contacts (phone numbers, emails).
pub const MAX_CONTACT_LENGTH: usize = 254;

/// Maximum length for `CallNext` request IDs.
pub const MAX_REQUEST_ID_LENGTH: usize = 128;

fn validate_text(field: &str, value: &str, max_len: usize) -> Result<(), String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(format!("{field} is required"));
    }
    if trimmed.chars().count() > max_len {
        return Err(format!("{field} must be at most {max_len} characters"));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(format!("{field} must not contain control characters"));
    }
    Ok(())
}

/// Request body for `POST /v1/providers/:id/entries`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    /// Holder's display name.
    pub name: String,

    /// Holder's contact; at most one pending entry per contact and provider.
    pub contact: String,
}

impl RegisterRequest {
    /// Validate the request.
    ///
    /// # Errors
    ///
    /// Returns an error message if a field is missing or malformed.
    pub fn validate(&self) -> Result<(), String> {
        validate_text("name", &self.name, MAX_NAME_LENGTH)?;
        validate_text("contact", &self.contact, MAX_CONTACT_LENGTH)
    }
}

/// Response for a successful registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub token_number: i64,
    pub entry_id: EntryId,
}

/// Request body for `POST /v1/providers/:id/call-next`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallNextRequest {
    /// Optional client token; a repeated ID replays the recorded outcome.
    #[serde(default)]
    pub request_id: Option<String>,
}

impl CallNextRequest {
    /// Validate the request.
    pub fn validate(&self) -> Result<(), String> {
        match &self.request_id {
            Some(id) => validate_text("request_id", id, MAX_REQUEST_ID_LENGTH),
            None => Ok(()),
        }
    }
}

/// Response for `CallNext`. `called` is `null` when the queue is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallNextResponse {
    pub called: Option<Entry>,
}

/// Response for `ListEntries`, ordered by token number ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListEntriesResponse {
    pub entries: Vec<Entry>,
}

/// Request body for `POST /v1/providers/:id/online`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleOnlineRequest {
    pub online: bool,
}

/// Response for `ToggleOnline`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleOnlineResponse {
    pub is_online: bool,
}

/// Response for `EndSession`. `ok` is false when some entries survived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndSessionResponse {
    pub ok: bool,
    pub removed: usize,
    pub remaining: Vec<EntryId>,
}

/// Generic acknowledgement (used by `Ring`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Request body for `POST /v1/providers` (first login).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderLoginRequest {
    pub name: String,
    pub contact: String,
}

impl ProviderLoginRequest {
    /// Validate the request.
    pub fn validate(&self) -> Result<(), String> {
        validate_text("name", &self.name, MAX_NAME_LENGTH)?;
        validate_text("contact", &self.contact, MAX_CONTACT_LENGTH)
    }
}

/// Health check response.
///
/// Returned by the `/v1/health` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service health status ("healthy" or "unhealthy").
    pub status: String,

    /// Instance identifier.
    pub instance_id: String,

    /// Store connectivity status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn entry(status: EntryStatus) -> Entry {
        Entry {
            id: EntryId::new(),
            provider_id: ProviderId::new(),
            holder_name: "Alice".to_string(),
            holder_contact: "111".to_string(),
            token_number: 1,
            status,
        }
    }

    #[test]
    fn test_status_transitions_only_move_forward() {
        assert!(EntryStatus::Waiting.can_transition_to(EntryStatus::Called));
        assert!(EntryStatus::Called.can_transition_to(EntryStatus::Done));

        assert!(!EntryStatus::Waiting.can_transition_to(EntryStatus::Done));
        assert!(!EntryStatus::Called.can_transition_to(EntryStatus::Waiting));
        assert!(!EntryStatus::Done.can_transition_to(EntryStatus::Waiting));
        assert!(!EntryStatus::Done.can_transition_to(EntryStatus::Called));
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [EntryStatus::Waiting, EntryStatus::Called, EntryStatus::Done] {
            assert_eq!(status.as_str().parse::<EntryStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<EntryStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&EntryStatus::Called).unwrap();
        assert_eq!(json, "\"called\"");
    }

    #[test]
    fn test_change_event_is_call() {
        assert!(ChangeEvent::status_changed(entry(EntryStatus::Called)).is_call());
        assert!(!ChangeEvent::status_changed(entry(EntryStatus::Done)).is_call());
        assert!(!ChangeEvent::removed(entry(EntryStatus::Called)).is_call());
    }

    #[test]
    fn test_change_event_key_distinguishes_status() {
        let called = entry(EntryStatus::Called);
        let mut done = called.clone();
        done.status = EntryStatus::Done;

        assert_ne!(
            ChangeEvent::status_changed(called).key(),
            ChangeEvent::status_changed(done).key()
        );
    }

    #[test]
    fn test_register_request_validation() {
        let ok = RegisterRequest {
            name: "Alice".to_string(),
            contact: "111".to_string(),
        };
        assert!(ok.validate().is_ok());

        let blank_name = RegisterRequest {
            name: "   ".to_string(),
            contact: "111".to_string(),
        };
        assert_eq!(blank_name.validate().unwrap_err(), "name is required");

        let long_contact = RegisterRequest {
            name: "Bob".to_string(),
            contact: "9".repeat(MAX_CONTACT_LENGTH + 1),
        };
        assert!(long_contact.validate().is_err());

        let control = RegisterRequest {
            name: "Eve\u{0007}".to_string(),
            contact: "333".to_string(),
        };
        assert!(control.validate().is_err());
    }

    #[test]
    fn test_register_request_rejects_unknown_fields() {
        let result: Result<RegisterRequest, _> =
            serde_json::from_str(r#"{"name": "A", "contact": "1", "token_number": 7}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_call_next_request_defaults() {
        let req: CallNextRequest = serde_json::from_str("{}").unwrap();
        assert!(req.request_id.is_none());
        assert!(req.validate().is_ok());

        let blank = CallNextRequest {
            request_id: Some(String::new()),
        };
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_call_next_response_serializes_null() {
        let json = serde_json::to_value(CallNextResponse { called: None }).unwrap();
        assert_eq!(json, serde_json::json!({ "called": null }));
    }
}
