//! End-to-End Test Suite
//!
//! Seeds live in-process targets through the public `kvparity` API, captures
//! them, and checks the comparison verdicts.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test end_to_end
//!
//! # Mismatch scenarios only
//! cargo test --test end_to_end mismatch::
//! ```

#[path = "../common/mod.rs"]
mod common;

mod consistency;
mod mismatch;
