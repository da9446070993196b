//! Core types for kvparity
//!
//! This crate defines the foundational types used throughout the workspace:
//! - RunId: Unique identifier for a seeding run
//! - ValueType: Discriminates between server-side value types
//! - Endpoint / Capabilities / Target: A server under test
//! - OperationSpec / Operation: One generated command against one key
//! - WorkloadConfig: Shape of a seeding run
//! - Error: Error taxonomy shared by every crate

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod operation;
pub mod types;

pub use config::WorkloadConfig;
pub use error::{Error, Result};
pub use operation::{Operation, OperationSpec};
pub use types::{Capabilities, Endpoint, RunId, Target, ValueType};
