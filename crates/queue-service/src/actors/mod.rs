//! Actor model for the queue service.
//!
//! ```text
//! QueueControllerActor (singleton per instance)
//! └── supervises N ProviderActors
//!     └── ProviderActor (one per provider, spawned on first use)
//!         └── sole writer of that provider's queue
//! ```
//!
//! - **Single writer per provider**: registrations, call-next, presence and
//!   session termination for one provider never interleave
//! - **CancellationToken propagation**: the controller hands child tokens to
//!   provider actors for graceful shutdown
//! - **Mailbox monitoring**: handles count sends, actors count receives;
//!   depth thresholds (Controller: 100/500, Provider: 50/200)
//!
//! # Modules
//!
//! - [`controller`] - `QueueControllerActor` singleton that supervises providers
//! - [`provider`] - `ProviderActor` per provider
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod controller;
pub mod messages;
pub mod metrics;
pub mod provider;

pub use controller::{QueueControllerActor, QueueControllerActorHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, MailboxMonitor};
pub use provider::{ProviderActor, ProviderActorHandle, ProviderContext};
