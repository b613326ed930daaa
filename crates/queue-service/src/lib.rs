//! Visitor Queue Service Library
//!
//! Per-provider queues of visitors ("tokens"): holders register and receive a
//! sequential token number, the provider calls the next one, and passive
//! displays follow along in real time.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/mod.rs (QueueService)
//!                                     ├── actors/ (one ProviderActor per provider, sole writer)
//!                                     │     └── services/{allocator,scheduler,session}.rs -> repositories/*.rs
//!                                     ├── notifications/ (change, ring and presence fan-out)
//!                                     └── watch/ (reconciled now-serving view)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer per provider**: registrations and call-next for one
//!   provider never interleave; different providers never contend
//! - **Transactional store steps**: token allocation and the call-next
//!   transition are each one store transaction
//! - **Publish after commit**: change events go out in commit order
//! - **Separate channels**: ring pulses are at-most-once and never share a
//!   channel with durable state changes
//!
//! # Modules
//!
//! - [`actors`] - Controller and per-provider actors
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with HTTP status code mapping
//! - [`handlers`] - HTTP and SSE handlers
//! - [`middleware`] - HTTP metrics middleware
//! - [`models`] - Entities, events and request/response types
//! - [`notifications`] - Notification bus
//! - [`observability`] - Prometheus metrics
//! - [`repositories`] - Store trait with in-memory and Postgres implementations
//! - [`routes`] - Axum router setup
//! - [`services`] - Queue operations
//! - [`tasks`] - Background maintenance tasks
//! - [`watch`] - Now-serving view

pub mod actors;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notifications;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
pub mod watch;
