//! Shared test utilities for the end-to-end suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use std::time::Duration;

pub use kvparity::{Endpoint, Seeder, SeederConfig, ValueType};
pub use kvparity_testing::{MemoryServer, ServerOptions};

/// Workload used by the acceptance scenario: 1000 keys in one database,
/// no JSON, no clock- or randomness-dependent commands.
pub fn acceptance_config() -> SeederConfig {
    let mut config = SeederConfig::default();
    config.workload = config
        .workload
        .with_keys(1000)
        .with_dbcount(1)
        .without_type(ValueType::Json)
        .with_non_deterministic_actions(false);
    config.pool = config
        .pool
        .with_backoff(Duration::from_millis(5), Duration::from_millis(50));
    config
}

/// Smaller workload for scenarios that only need a populated keyspace
pub fn small_config(keys: u64) -> SeederConfig {
    let mut config = acceptance_config();
    config.workload = config.workload.with_keys(keys);
    config
}

/// Start `n` empty in-process targets
pub async fn start_targets(n: usize) -> Vec<MemoryServer> {
    let mut servers = Vec::with_capacity(n);
    for _ in 0..n {
        servers.push(MemoryServer::start().await.expect("start memory server"));
    }
    servers
}

/// Endpoints of `servers`
pub fn endpoints(servers: &[MemoryServer]) -> Vec<Endpoint> {
    servers.iter().map(MemoryServer::endpoint).collect()
}

/// Seeder connected to every server
pub async fn seeder_for(servers: &[MemoryServer], config: SeederConfig) -> Seeder {
    Seeder::connect(&endpoints(servers), config)
        .await
        .expect("connect seeder")
}
