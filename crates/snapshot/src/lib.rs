//! Keyspace capture and comparison
//!
//! - [`Capturer`] reads a target's keyspace into a [`Snapshot`] using cursor
//!   scans and per-type accessors
//! - [`compare`] checks two snapshots for semantic equality and explains the
//!   differences in a [`DiffReport`]

#![warn(missing_docs)]

pub mod capture;
pub mod compare;
pub mod snapshot;

pub use capture::{canonical_json, CaptureConfig, Capturer, CutoffPolicy, GenerationToken};
pub use compare::{compare, CompareOptions, DiffReport, Mismatch, MismatchKind};
pub use snapshot::{Blob, CanonicalValue, KeyRef, KeyState, Snapshot, SnapshotMeta, TtlBucket};
