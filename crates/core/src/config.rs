//! Workload configuration
//!
//! Persisted under the `[workload]` section of `kvparity.toml`; every field
//! has a serde default so partial files are accepted.
//!
//! ```toml
//! [workload]
//! keys = 1000
//! dbcount = 1
//! unsupported_types = ["JSON"]
//! allow_non_deterministic_actions = false
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::types::ValueType;

/// Configuration of a seeding run. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Total distinct key budget (per run, across all databases)
    #[serde(default = "default_keys")]
    pub keys: u64,
    /// Number of logical databases keys are spread over
    #[serde(default = "default_dbcount")]
    pub dbcount: u16,
    /// Value types never generated
    #[serde(default)]
    pub unsupported_types: BTreeSet<ValueType>,
    /// Include operations whose outcome depends on server clocks or
    /// server-side randomness (`EXPIRE`, `SPOP`)
    #[serde(default)]
    pub allow_non_deterministic_actions: bool,
    /// Seed of the run's pseudo-random generator
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Operations per generated batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Operation ceiling as a multiple of `keys`
    #[serde(default = "default_max_ops_multiplier")]
    pub max_ops_multiplier: u64,
    /// Upper bound on generated payload length in bytes
    #[serde(default = "default_value_size")]
    pub value_size: usize,
    /// Probability that a mutation targets a key already present
    #[serde(default = "default_hot_key_bias")]
    pub hot_key_bias: f64,
}

fn default_keys() -> u64 {
    1000
}

fn default_dbcount() -> u16 {
    1
}

fn default_seed() -> u64 {
    0x5eed
}

fn default_batch_size() -> usize {
    100
}

fn default_max_ops_multiplier() -> u64 {
    20
}

fn default_value_size() -> usize {
    16
}

fn default_hot_key_bias() -> f64 {
    0.8
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            keys: default_keys(),
            dbcount: default_dbcount(),
            unsupported_types: BTreeSet::new(),
            allow_non_deterministic_actions: false,
            seed: default_seed(),
            batch_size: default_batch_size(),
            max_ops_multiplier: default_max_ops_multiplier(),
            value_size: default_value_size(),
            hot_key_bias: default_hot_key_bias(),
        }
    }
}

impl WorkloadConfig {
    /// Set key budget
    pub fn with_keys(mut self, keys: u64) -> Self {
        self.keys = keys;
        self
    }

    /// Set number of logical databases
    pub fn with_dbcount(mut self, dbcount: u16) -> Self {
        self.dbcount = dbcount;
        self
    }

    /// Exclude a value type from generation
    pub fn without_type(mut self, value_type: ValueType) -> Self {
        self.unsupported_types.insert(value_type);
        self
    }

    /// Allow or forbid non-deterministic operations
    pub fn with_non_deterministic_actions(mut self, allow: bool) -> Self {
        self.allow_non_deterministic_actions = allow;
        self
    }

    /// Set PRNG seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set operation ceiling multiplier
    pub fn with_max_ops_multiplier(mut self, multiplier: u64) -> Self {
        self.max_ops_multiplier = multiplier;
        self
    }

    /// Value types the generator may draw, in draw order
    pub fn enabled_types(&self) -> Vec<ValueType> {
        ValueType::ALL
            .into_iter()
            .filter(|t| !self.unsupported_types.contains(t))
            .collect()
    }

    /// Hard ceiling on the number of generated operations
    pub fn op_ceiling(&self) -> u64 {
        self.keys.saturating_mul(self.max_ops_multiplier)
    }

    /// Reject configurations a run cannot honor.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.keys == 0 {
            return Err(Error::invalid_config("workload.keys must be at least 1"));
        }
        if self.dbcount == 0 {
            return Err(Error::invalid_config("workload.dbcount must be at least 1"));
        }
        if self.enabled_types().is_empty() {
            return Err(Error::invalid_config(
                "workload.unsupported_types excludes every value type",
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::invalid_config("workload.batch_size must be at least 1"));
        }
        if self.max_ops_multiplier == 0 {
            return Err(Error::invalid_config(
                "workload.max_ops_multiplier must be at least 1",
            ));
        }
        if self.value_size == 0 {
            return Err(Error::invalid_config("workload.value_size must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.hot_key_bias) {
            return Err(Error::invalid_config(format!(
                "workload.hot_key_bias must be within [0, 1], got {}",
                self.hot_key_bias
            )));
        }
        Ok(())
    }
}
