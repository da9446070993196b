//! Cross-server consistency verification
//!
//! The [`Seeder`] applies one deterministic workload to every target, then
//! captures and compares their keyspaces:
//!
//! ```no_run
//! # async fn demo() -> kvparity_core::Result<()> {
//! use kvparity_core::Endpoint;
//! use kvparity_seeder::{Seeder, SeederConfig};
//!
//! let a = Endpoint::localhost(6379);
//! let b = Endpoint::localhost(6380);
//! let seeder = Seeder::connect(&[a.clone(), b.clone()], SeederConfig::default()).await?;
//! seeder.run(0.1).await?;
//! let left = seeder.capture(&a).await?;
//! let right = seeder.capture(&b).await?;
//! assert!(seeder.compare(left, right).await?);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod lifecycle;
pub mod report;
pub mod seeder;

pub use config::{SeederConfig, CONFIG_FILE_NAME};
pub use lifecycle::{wait_ready, ServerProcess, ServerSpec};
pub use report::RunReport;
pub use seeder::{CancelHandle, Seeder, SnapshotHandle};

pub use kvparity_core::{Endpoint, Error, Result, Target, ValueType, WorkloadConfig};
pub use kvparity_pool::PoolConfig;
pub use kvparity_snapshot::{
    CaptureConfig, CompareOptions, CutoffPolicy, DiffReport, Mismatch, MismatchKind, Snapshot,
};
pub use kvparity_workload::{DeviationMetric, DidNotConverge, StopReason};
