use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use streamrelay_queue::DEFAULT_CAPACITY;

use crate::error::{RelayError, Result};

/// Default largest single write handed to the endpoint (5 MiB).
pub const DEFAULT_MAX_WRITE_SIZE: usize = 0x50_0000;

/// Default endpoint file name, placed in the system temp directory.
pub const DEFAULT_ENDPOINT_NAME: &str = "streamrelay.sock";

/// How the serve loop reacts when the endpoint cannot be created or a
/// client cannot be accepted.
///
/// Configuration-level failures (name held by another process, path too
/// long, a foreign file at the path) end the loop under either policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum FailurePolicy {
    /// Stop serving on the first failure.
    FailFast,
    /// Rebuild the endpoint with exponential backoff.
    Retry(RetryPolicy),
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Retry(RetryPolicy::default())
    }
}

/// Exponential backoff for endpoint recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Give up after this many consecutive failures. `None` retries forever.
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    /// Whether another attempt is allowed after `failures` consecutive failures.
    pub fn allows(&self, failures: u32) -> bool {
        self.max_attempts.is_none_or(|max| failures < max)
    }
}

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Socket path of the single well-known endpoint.
    pub endpoint: PathBuf,
    /// Maximum bytes buffered while no client drains the queue.
    pub capacity: usize,
    /// Largest single write to the client; also the socket send buffer hint.
    pub max_write_size: usize,
    /// Treat a client that stops reading for this long as disconnected.
    pub write_timeout_ms: Option<u64>,
    pub on_endpoint_failure: FailurePolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: std::env::temp_dir().join(DEFAULT_ENDPOINT_NAME),
            capacity: DEFAULT_CAPACITY,
            max_write_size: DEFAULT_MAX_WRITE_SIZE,
            write_timeout_ms: None,
            on_endpoint_failure: FailurePolicy::default(),
        }
    }
}

impl RelayConfig {
    /// Default configuration bound to `endpoint`.
    pub fn new(endpoint: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Load a JSON configuration file. Missing fields take default values.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| RelayError::ConfigLoad {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_max_write_size(mut self, max_write_size: usize) -> Self {
        self.max_write_size = max_write_size;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout_ms = timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_endpoint_failure = policy;
        self
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.as_os_str().is_empty() {
            return Err(RelayError::InvalidConfig(
                "endpoint path must not be empty".to_string(),
            ));
        }
        if self.capacity == 0 {
            return Err(RelayError::InvalidConfig(
                "capacity must be greater than zero".to_string(),
            ));
        }
        if self.max_write_size == 0 {
            return Err(RelayError::InvalidConfig(
                "max_write_size must be greater than zero".to_string(),
            ));
        }
        if self.write_timeout_ms == Some(0) {
            return Err(RelayError::InvalidConfig(
                "write_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if let FailurePolicy::Retry(retry) = &self.on_endpoint_failure {
            if retry.max_backoff_ms < retry.initial_backoff_ms {
                return Err(RelayError::InvalidConfig(
                    "max_backoff_ms must not be below initial_backoff_ms".to_string(),
                ));
            }
        }
        Ok(())
    }
}
