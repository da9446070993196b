//! Pool configuration (`[pool]` section of `kvparity.toml`)

use serde::{Deserialize, Serialize};
use std::time::Duration;

use kvparity_core::{Error, Result};

/// Connection pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Concurrent connections per target; callers beyond this block
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Retries after the first failed attempt of a connectivity failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay in milliseconds (doubles per retry)
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Retry delay cap in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Per-operation timeout in milliseconds
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Protocol version requested in the handshake
    #[serde(default = "default_protocol")]
    pub protocol: u8,
}

fn default_max_connections() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    50
}

fn default_max_backoff_ms() -> u64 {
    2000
}

fn default_op_timeout_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_protocol() -> u8 {
    3
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            op_timeout_ms: default_op_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            protocol: default_protocol(),
        }
    }
}

impl PoolConfig {
    /// Set the per-target connection bound
    pub fn with_max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }

    /// Set the retry bound
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set backoff base and cap
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff_ms = base.as_millis() as u64;
        self.max_backoff_ms = max.as_millis() as u64;
        self
    }

    /// Set the per-operation timeout
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Per-operation timeout
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// TCP connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reject settings the pool cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::invalid_config("pool.max_connections must be at least 1"));
        }
        if self.op_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(Error::invalid_config("pool timeouts must be non-zero"));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(Error::invalid_config(
                "pool.base_backoff_ms must not exceed pool.max_backoff_ms",
            ));
        }
        if !(2..=3).contains(&self.protocol) {
            return Err(Error::invalid_config(format!(
                "pool.protocol must be 2 or 3, got {}",
                self.protocol
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        PoolConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_zero_connections() {
        assert!(PoolConfig::default()
            .with_max_connections(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let config = PoolConfig::default()
            .with_backoff(Duration::from_millis(500), Duration::from_millis(100));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_protocol() {
        let mut config = PoolConfig::default();
        config.protocol = 4;
        assert!(config.validate().is_err());
    }
}
