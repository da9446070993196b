//! kvparity - cross-server consistency verification for RESP key-value servers
//!
//! kvparity drives the same deterministic, seeded workload into several
//! servers (a master and its replicas, two versions of one server, a server
//! before and after a restart) and then checks that their keyspaces agree.
//!
//! # Quick Start
//!
//! ```ignore
//! use kvparity::{Endpoint, Seeder, SeederConfig, ValueType};
//!
//! let mut config = SeederConfig::default();
//! config.workload = config.workload.with_keys(1000).without_type(ValueType::Json);
//!
//! let master = Endpoint::localhost(6379);
//! let replica = Endpoint::localhost(6380);
//! let seeder = Seeder::connect(&[master.clone()], config).await?;
//! seeder.run(0.1).await?;
//! let snapshot = seeder.capture(&master).await?;
//! assert!(seeder.compare_with_target(snapshot, &replica).await?);
//! ```
//!
//! # Architecture
//!
//! - `kvparity-wire`: RESP2/RESP3 codec
//! - `kvparity-pool`: bounded, retrying connection pool with ordered broadcast
//! - `kvparity-workload`: seeded generator and deviation controller
//! - `kvparity-snapshot`: type-aware capture and comparison
//! - `kvparity-seeder`: the facade re-exported here

// Re-export the public API from kvparity-seeder
pub use kvparity_seeder::*;
