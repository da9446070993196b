//! In-process key-value server for tests
//!
//! [`MemoryServer`] binds an ephemeral loopback port and speaks RESP2/RESP3
//! for the command subset the engine issues: connection management, keyspace
//! enumeration, TTLs and the typed string/list/set/hash/zset/JSON commands.
//! Expired keys are removed lazily on access.
//!
//! ```ignore
//! let server = MemoryServer::start().await?;
//! let endpoint = server.endpoint();
//! ```

#![warn(missing_docs)]

pub mod commands;
pub mod server;
pub mod store;

pub use server::{MemoryServer, ServerOptions};
pub use store::{Entry, Store, Value};
