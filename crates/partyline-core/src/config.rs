//! Client configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! notice_capacity = 16
//! auto_subscribe_host = true
//!
//! [retry]
//! base_delay_ms = 2000
//! max_retries = 3
//! subscribe_timeout_ms = 10000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

/// Retry schedule for a change subscription
///
/// Retry `n` (1-based) waits `n * base_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_retries: u32,
    /// How long a subscribe attempt may wait for its acknowledgement
    pub subscribe_timeout_ms: u64,
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    /// Delay before retry `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay().saturating_mul(attempt)
    }

    /// Whether retry `attempt` still fits in the budget
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 2_000,
            max_retries: 3,
            subscribe_timeout_ms: 10_000,
        }
    }
}

/// Settings shared by every session a client opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Buffered change notices per session before extra ones are coalesced
    pub notice_capacity: usize,
    /// Start the change subscription automatically for hosts
    pub auto_subscribe_host: bool,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            notice_capacity: 16,
            auto_subscribe_host: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> SessionResult<Self> {
        let config: ClientConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file from disk
    pub fn load(path: impl AsRef<Path>) -> SessionResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> SessionResult<String> {
        toml::to_string_pretty(self).map_err(|e| SessionError::Config(e.to_string()))
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.retry.base_delay_ms == 0 {
            return Err(SessionError::Config(
                "retry.base_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.notice_capacity == 0 {
            return Err(SessionError::Config(
                "notice_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
