//! Error types for kvparity
//!
//! This module defines the error taxonomy shared by every crate in the
//! workspace. We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.
//!
//! | Variant | Retried | Meaning |
//! |---------|---------|---------|
//! | `Connectivity` | yes, up to the pool bound | connect refused/reset, timeout |
//! | `Protocol` | never | malformed reply, unexpected reply, error reply |
//! | `InvalidConfig` | never | rejected before any traffic is issued |
//! | `Io` | never | local I/O (config files, process spawning) |
//! | `Lifecycle` | never | server process could not be started or stopped |
//! | `UnknownSnapshot` | never | snapshot handle not issued by this seeder |
//!
//! Non-convergence of a run and snapshot mismatches are not errors: they are
//! reported as data (`RunReport::warning`, `DiffReport`).

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for kvparity operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the verification engine
#[derive(Debug, Error)]
pub enum Error {
    /// Transient network failure talking to a target
    #[error("connectivity error on {target} after {attempts} attempt(s): {reason}")]
    Connectivity {
        /// Target address (`host:port`)
        target: String,
        /// What went wrong
        reason: String,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Target violated the assumed protocol contract
    #[error("protocol error on {target}: {reason}")]
    Protocol {
        /// Target address (`host:port`)
        target: String,
        /// What went wrong
        reason: String,
    },

    /// Configuration rejected during validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Server process could not be started, probed or stopped
    #[error("server lifecycle error: {0}")]
    Lifecycle(String),

    /// Snapshot handle was not issued by this seeder
    #[error("unknown snapshot handle: {0}")]
    UnknownSnapshot(u64),

    /// Work stopped by a cancel request before it started
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Connectivity failure on its first attempt
    pub fn connectivity(target: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Error::Connectivity {
            target: target.to_string(),
            reason: reason.to_string(),
            attempts: 1,
        }
    }

    /// Protocol violation
    pub fn protocol(target: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Error::Protocol {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Configuration rejection
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Error::InvalidConfig(reason.into())
    }

    /// Whether the pool may retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connectivity { .. })
    }

    /// Record the number of attempts on a connectivity error.
    ///
    /// Other variants are returned unchanged.
    pub fn with_attempts(self, n: u32) -> Self {
        match self {
            Error::Connectivity { target, reason, .. } => Error::Connectivity {
                target,
                reason,
                attempts: n,
            },
            other => other,
        }
    }

    /// Target the error is tagged with, if any
    pub fn target(&self) -> Option<&str> {
        match self {
            Error::Connectivity { target, .. } | Error::Protocol { target, .. } => Some(target),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_connectivity() {
        let err = Error::Connectivity {
            target: "127.0.0.1:6379".to_string(),
            reason: "connection refused".to_string(),
            attempts: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1:6379"));
        assert!(msg.contains("4 attempt"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_error_display_protocol() {
        let err = Error::protocol("127.0.0.1:6380", "unexpected reply to TYPE");
        let msg = err.to_string();
        assert!(msg.contains("protocol error"));
        assert!(msg.contains("unexpected reply to TYPE"));
    }

    #[test]
    fn test_only_connectivity_is_retryable() {
        assert!(Error::connectivity("a:1", "reset").is_retryable());
        assert!(!Error::protocol("a:1", "bad frame").is_retryable());
        assert!(!Error::invalid_config("keys = 0").is_retryable());
        assert!(!Error::UnknownSnapshot(3).is_retryable());
    }

    #[test]
    fn test_with_attempts() {
        let err = Error::connectivity("a:1", "timed out").with_attempts(5);
        match err {
            Error::Connectivity { attempts, .. } => assert_eq!(attempts, 5),
            other => panic!("Wrong error variant: {:?}", other),
        }

        let err = Error::protocol("a:1", "x").with_attempts(5);
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn test_target_tag() {
        assert_eq!(Error::connectivity("h:1", "x").target(), Some("h:1"));
        assert_eq!(Error::protocol("h:2", "x").target(), Some("h:2"));
        assert_eq!(Error::Lifecycle("spawn".into()).target(), None);
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
