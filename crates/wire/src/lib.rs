//! RESP2/RESP3 wire codec
//!
//! - [`Frame`]: decoded reply model (RESP3 superset)
//! - [`decode`]: incremental decoder over a byte buffer
//! - [`encode_command`] / [`encode_frame`]: request and reply encoders

#![warn(missing_docs)]

pub mod decode;
pub mod encode;
pub mod frame;

pub use decode::{decode, DecodeError, MAX_BULK_LEN, MAX_DEPTH};
pub use encode::{encode_command, encode_frame};
pub use frame::{format_double, parse_double, Frame};
