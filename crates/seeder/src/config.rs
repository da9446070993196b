//! Seeder configuration via `kvparity.toml`
//!
//! One file carries every tunable of a verification run, split into the
//! `[workload]`, `[pool]`, `[capture]` and `[compare]` sections. Missing
//! sections and fields take their defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;

use kvparity_core::{Error, Result, WorkloadConfig};
use kvparity_pool::PoolConfig;
use kvparity_snapshot::{CaptureConfig, CompareOptions};

/// Conventional config file name.
pub const CONFIG_FILE_NAME: &str = "kvparity.toml";

/// Complete seeder configuration loaded from `kvparity.toml`.
///
/// # Example
///
/// ```toml
/// [workload]
/// keys = 1000
/// unsupported_types = ["JSON"]
///
/// [pool]
/// max_connections = 8
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeederConfig {
    /// Shape of the generated workload
    #[serde(default)]
    pub workload: WorkloadConfig,
    /// Connection pool limits and retry policy
    #[serde(default)]
    pub pool: PoolConfig,
    /// Snapshot capture settings
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Comparison settings
    #[serde(default)]
    pub compare: CompareOptions,
}

impl SeederConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# kvparity configuration

[workload]
# Distinct keys the run aims to populate
keys = 1000
# Logical databases keys are spread over
dbcount = 1
# Value types never generated: STRING, LIST, SET, HASH, ZSET, JSON
unsupported_types = []
# Allow EXPIRE and SPOP, whose outcome depends on server clocks or randomness
allow_non_deterministic_actions = false
# Seed of the workload generator; equal seeds give equal workloads
seed = 24301
# Operations generated and broadcast per batch
batch_size = 100
# Hard stop after keys * max_ops_multiplier operations
max_ops_multiplier = 20

[pool]
# Concurrent connections per target
max_connections = 4
# Retries of a failed command before giving up
max_retries = 3
# Backoff between retries, doubling from base up to max
base_backoff_ms = 50
max_backoff_ms = 2000
# Per-command reply timeout
op_timeout_ms = 5000
# Protocol version requested with HELLO (falls back to 2)
protocol = 3

[capture]
# COUNT hint for SCAN, SSCAN, HSCAN and ZSCAN
scan_count = 100
# Elements read per LRANGE
list_chunk = 100
# Keys expiring sooner than this are in the short TTL bucket
short_ttl_ms = 5000
# Databases to scan; discovered from INFO keyspace when omitted
# databases = 16

[capture.cutoff]
# "stable" rescans while the keyspace changes, "single_pass" does not
mode = "stable"
max_passes = 3

[compare]
# Forgive keys present on one side only if they were about to expire
tolerate_expiring = true
# Require both sides to agree on whether a key has a TTL
compare_ttl = true
"#
    }

    /// Parse config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SeederConfig = toml::from_str(content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::InvalidConfig(reason) => {
                Error::InvalidConfig(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Reject configurations no run could honor
    pub fn validate(&self) -> Result<()> {
        self.workload.validate()?;
        self.pool.validate()?;
        self.capture.validate()
    }
}
