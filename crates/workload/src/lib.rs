//! Workload generation for kvparity
//!
//! - [`RunState`]: seeded generator state and keyspace model
//! - [`next_batch`]: deterministic batch generation
//! - [`DeviationController`]: decides when a run has done enough

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod deviation;
pub mod generator;
pub mod run_state;

pub use deviation::{
    converged, validate_target, DeviationController, DeviationMetric, DidNotConverge, StopReason,
};
pub use generator::{next_batch, JSON_COUNTER_PATH};
pub use run_state::{key_name, KeySlot, RunState};
