//! Connection pool for kvparity targets
//!
//! - [`Connection`]: one TCP stream with handshake and `SELECT` tracking
//! - [`TargetPool`] / [`ConnectionPool`]: bounded per-target checkout with
//!   retry and backoff
//! - [`ConnectionPool::broadcast`]: key-affine batch dispatch to all targets

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod pool;
pub mod retry;

pub use config::PoolConfig;
pub use connection::Connection;
pub use dispatch::{partition, shard_of, BroadcastResult};
pub use pool::{ConnectionPool, PooledConnection, TargetPool};
pub use retry::Backoff;
