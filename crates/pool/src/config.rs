//! Worker pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PoolError;

/// Environment variable for [`PoolConfig::max_units`]
pub const ENV_MAX_UNITS: &str = "PARALLEL_WORKERS_MAX_UNITS";
/// Environment variable for [`PoolConfig::timeout`] in milliseconds
pub const ENV_TIMEOUT_MS: &str = "PARALLEL_WORKERS_TIMEOUT_MS";
/// Environment variable for [`PoolConfig::terminate_on_error`]
pub const ENV_TERMINATE_ON_ERROR: &str = "PARALLEL_WORKERS_TERMINATE_ON_ERROR";
/// Environment variable for [`PoolConfig::name`]
pub const ENV_NAME: &str = "PARALLEL_WORKERS_NAME";

/// Worker pool configuration
///
/// Immutable once handed to [`WorkerPool::new`](crate::WorkerPool::new).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    /// Pool name, attached to every log record
    pub name: String,

    /// Upper bound on concurrently live units
    pub max_units: usize,

    /// Per-invocation deadline (zero disables it)
    #[serde(with = "duration_millis")]
    pub timeout: Duration,

    /// Tear the whole pool down when a unit reports an error
    pub terminate_on_error: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: format!("pool-{}", Uuid::now_v7()),
            max_units: default_max_units(),
            timeout: Duration::ZERO,
            terminate_on_error: false,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config from environment variables
    ///
    /// Environment variables:
    /// - PARALLEL_WORKERS_MAX_UNITS: Max live units (default: host parallelism)
    /// - PARALLEL_WORKERS_TIMEOUT_MS: Per-invocation deadline (0 = none)
    /// - PARALLEL_WORKERS_TERMINATE_ON_ERROR: "true"/"1" to tear down on error
    /// - PARALLEL_WORKERS_NAME: Pool name used in logs
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            name: std::env::var(ENV_NAME).unwrap_or(defaults.name),
            max_units: std::env::var(ENV_MAX_UNITS)
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .map(|n| n.max(1))
                .unwrap_or(defaults.max_units),
            timeout: std::env::var(ENV_TIMEOUT_MS)
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            terminate_on_error: std::env::var(ENV_TERMINATE_ON_ERROR)
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.terminate_on_error),
        }
    }

    /// Set the pool name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set maximum number of units
    pub fn with_max_units(mut self, max: usize) -> Self {
        self.max_units = max.max(1);
        self
    }

    /// Set the per-invocation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Escalate unit errors into a full pool teardown
    pub fn with_terminate_on_error(mut self, enabled: bool) -> Self {
        self.terminate_on_error = enabled;
        self
    }

    /// Deadline applied to each dispatch, if any
    pub fn deadline(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_units == 0 {
            return Err(PoolError::InvalidConfig(
                "max_units must be at least 1".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(PoolError::InvalidConfig(
                "name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Host-reported parallelism, never below one
pub fn default_max_units() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1)
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
