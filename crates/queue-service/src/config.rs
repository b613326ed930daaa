//! Queue service configuration.
//!
//! Configuration is loaded from environment variables. The database URL is
//! redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default deadline for a single store operation in milliseconds.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5000;

/// Default broadcast buffer per notification channel.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Default interval between reconciling reads of the called slot.
pub const DEFAULT_RECONCILE_INTERVAL_SECONDS: u64 = 10;

/// Default number of `CallNext` request IDs remembered per provider.
pub const DEFAULT_CALL_NEXT_REPLAY_WINDOW: usize = 32;

/// Default graceful shutdown drain period.
pub const DEFAULT_DRAIN_SECONDS: u64 = 0;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "queue";

/// Queue service configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL. `None` selects the in-memory store.
    pub database_url: Option<SecretString>,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Unique identifier for this instance, reported by the health endpoint.
    pub instance_id: String,

    /// Deadline applied to every store operation.
    pub store_timeout: Duration,

    /// Per-channel broadcast buffer. Subscribers that fall further behind
    /// than this lose the oldest events.
    pub bus_capacity: usize,

    /// Interval between reconciling reads for the now-serving view.
    pub reconcile_interval: Duration,

    /// Number of recent `CallNext` request IDs replayed instead of re-run.
    pub call_next_replay_window: usize,

    /// Seconds to wait after a shutdown signal before exiting.
    pub drain_seconds: u64,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("bind_address", &self.bind_address)
            .field("instance_id", &self.instance_id)
            .field("store_timeout", &self.store_timeout)
            .field("bus_capacity", &self.bus_capacity)
            .field("reconcile_interval", &self.reconcile_interval)
            .field("call_next_replay_window", &self.call_next_replay_window)
            .field("drain_seconds", &self.drain_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Parse an optional positive integer variable, falling back to `default`.
fn parse_positive<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default + Copy,
    T::Err: fmt::Display,
{
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: T = value_str.parse().map_err(|e| {
        ConfigError::InvalidValue(format!(
            "{name} must be a valid positive integer, got '{value_str}': {e}"
        ))
    })?;

    if value <= T::default() {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than 0"
        )));
    }

    Ok(value)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .map(|url| SecretString::from(url.clone()));

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let store_timeout_ms =
            parse_positive(vars, "QUEUE_STORE_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT_MS)?;
        let bus_capacity = parse_positive(vars, "QUEUE_BUS_CAPACITY", DEFAULT_BUS_CAPACITY)?;
        let reconcile_interval_seconds = parse_positive(
            vars,
            "QUEUE_RECONCILE_INTERVAL_SECONDS",
            DEFAULT_RECONCILE_INTERVAL_SECONDS,
        )?;
        let call_next_replay_window = parse_positive(
            vars,
            "QUEUE_CALL_NEXT_REPLAY_WINDOW",
            DEFAULT_CALL_NEXT_REPLAY_WINDOW,
        )?;

        // Zero is meaningful here: skip the drain entirely.
        let drain_seconds = match vars.get("QUEUE_DRAIN_SECONDS") {
            Some(value_str) => value_str.parse().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "QUEUE_DRAIN_SECONDS must be a valid integer, got '{value_str}': {e}"
                ))
            })?,
            None => DEFAULT_DRAIN_SECONDS,
        };

        // Generate instance ID
        let instance_id = vars.get("QUEUE_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            database_url,
            bind_address,
            instance_id,
            store_timeout: Duration::from_millis(store_timeout_ms),
            bus_capacity,
            reconcile_interval: Duration::from_secs(reconcile_interval_seconds),
            call_next_replay_window,
            drain_seconds,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load");

        assert!(config.database_url.is_none());
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(
            config.store_timeout,
            Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS)
        );
        assert_eq!(config.bus_capacity, DEFAULT_BUS_CAPACITY);
        assert_eq!(
            config.reconcile_interval,
            Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECONDS)
        );
        assert_eq!(config.call_next_replay_window, DEFAULT_CALL_NEXT_REPLAY_WINDOW);
        assert_eq!(config.drain_seconds, DEFAULT_DRAIN_SECONDS);
        assert!(config.instance_id.starts_with("queue-"));
    }

    #[test]
    fn test_from_vars_custom_values() {
        let vars = HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgres://queue:pw@localhost/queue".to_string(),
            ),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:9090".to_string()),
            ("QUEUE_INSTANCE_ID".to_string(), "queue-test-01".to_string()),
            ("QUEUE_STORE_TIMEOUT_MS".to_string(), "250".to_string()),
            ("QUEUE_BUS_CAPACITY".to_string(), "16".to_string()),
            ("QUEUE_RECONCILE_INTERVAL_SECONDS".to_string(), "3".to_string()),
            ("QUEUE_CALL_NEXT_REPLAY_WINDOW".to_string(), "4".to_string()),
            ("QUEUE_DRAIN_SECONDS".to_string(), "0".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load");

        assert_eq!(
            config.database_url.as_ref().unwrap().expose_secret(),
            "postgres://queue:pw@localhost/queue"
        );
        assert_eq!(config.bind_address, "127.0.0.1:9090");
        assert_eq!(config.instance_id, "queue-test-01");
        assert_eq!(config.store_timeout, Duration::from_millis(250));
        assert_eq!(config.bus_capacity, 16);
        assert_eq!(config.reconcile_interval, Duration::from_secs(3));
        assert_eq!(config.call_next_replay_window, 4);
        assert_eq!(config.drain_seconds, 0);
    }

    #[test]
    fn test_empty_database_url_selects_memory_store() {
        let vars = HashMap::from([("DATABASE_URL".to_string(), "  ".to_string())]);
        let config = Config::from_vars(&vars).unwrap();
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_rejects_zero_bus_capacity() {
        let vars = HashMap::from([("QUEUE_BUS_CAPACITY".to_string(), "0".to_string())]);
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("QUEUE_BUS_CAPACITY")));
    }

    #[test]
    fn test_rejects_non_numeric_timeout() {
        let vars = HashMap::from([("QUEUE_STORE_TIMEOUT_MS".to_string(), "soon".to_string())]);
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("soon")));
    }

    #[test]
    fn test_debug_redacts_database_url() {
        let vars = HashMap::from([(
            "DATABASE_URL".to_string(),
            "postgres://queue:hunter2@db/queue".to_string(),
        )]);
        let config = Config::from_vars(&vars).unwrap();

        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("hunter2"));
    }
}
