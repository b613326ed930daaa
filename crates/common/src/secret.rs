//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used across the queue crates. The store
//! connection string carries credentials, so configuration holds it as a
//! `SecretString` and only calls `expose_secret()` at the point of connecting.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct StoreSettings {
//!     database_url: SecretString,
//! }
//!
//! let settings = StoreSettings {
//!     database_url: SecretString::from("postgres://queue:hunter2@db/queue"),
//! };
//!
//! assert!(!format!("{settings:?}").contains("hunter2"));
//! assert!(settings.database_url.expose_secret().starts_with("postgres://"));
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
