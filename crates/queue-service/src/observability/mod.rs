//! Observability module for the queue service.
//!
//! Provides metrics definitions and the Prometheus recorder setup.

pub mod metrics;
