//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.

use super::provider::ProviderActorHandle;
use crate::errors::QueueError;
use crate::models::{EndSessionOutcome, Entry, NewEntry, Provider};
use common::types::ProviderId;
use tokio::sync::oneshot;

/// Messages sent to `QueueControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Get the actor owning a provider, spawning it on first use.
    GetProvider {
        provider_id: ProviderId,
        /// Response channel for the provider actor handle or error.
        respond_to: oneshot::Sender<Result<ProviderActorHandle, QueueError>>,
    },

    /// Get current status (for health checks).
    GetStatus {
        /// Response channel for controller status.
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// Stop accepting work and cancel every provider actor.
    Shutdown {
        /// Response channel for confirmation.
        respond_to: oneshot::Sender<Result<(), QueueError>>,
    },
}

/// Messages sent to a `ProviderActor`. Handled strictly one at a time.
#[derive(Debug)]
pub enum ProviderMessage {
    /// Allocate the next token for a validated registration.
    Register {
        new_entry: NewEntry,
        /// Response channel for the created entry.
        respond_to: oneshot::Sender<Result<Entry, QueueError>>,
    },

    /// Close out the called entry and call the next waiting one.
    CallNext {
        /// Client retry token; a recently seen ID replays the recorded result.
        request_id: Option<String>,
        /// Response channel for the newly called entry (`None` when empty).
        respond_to: oneshot::Sender<Result<Option<Entry>, QueueError>>,
    },

    /// Flip the provider's online flag.
    SetOnline {
        online: bool,
        /// Response channel for the updated provider.
        respond_to: oneshot::Sender<Result<Provider, QueueError>>,
    },

    /// Take the provider offline and clear its queue.
    EndSession {
        /// Response channel for the session outcome.
        respond_to: oneshot::Sender<Result<EndSessionOutcome, QueueError>>,
    },
}

/// Controller status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerStatus {
    /// Number of running provider actors.
    pub provider_count: usize,
    /// Whether the controller has stopped accepting work.
    pub is_draining: bool,
    /// Current controller mailbox depth.
    pub mailbox_depth: usize,
}
