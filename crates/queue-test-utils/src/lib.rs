//! # Queue Test Utilities
//!
//! Shared test utilities for the visitor queue service.
//!
//! This crate provides:
//! - Server test harness (`TestQueueServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use queue_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestQueueServer::spawn().await?;
//!     let provider_id = server.online_provider("Dr. Rao", "rao@example.com").await?;
//!
//!     let response = server.register(provider_id, "Alice", "111").await?;
//!     assert_eq!(response.status(), 201);
//!     Ok(())
//! }
//! ```

pub mod server_harness;

// Re-export commonly used items
pub use server_harness::*;
