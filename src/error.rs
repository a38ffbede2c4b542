//! Error values for recoverable conditions.
//!
//! An [`Error`] is data (a kind plus a description), returned by protocol
//! `parse`, session sends and accept handling. Transient OS conditions
//! (would-block, interrupted calls) never appear here: they are absorbed at
//! the syscall site and the operation is re-armed for the next readiness
//! notification. Violations of calling-code invariants (wrong thread,
//! double registration, use after disconnect) are assertions, not `Error`s.

use thiserror::Error;

/// Recoverable failure reported to the owner of a session or acceptor.
#[derive(Debug, Error)]
pub enum Error {
    /// The peer sent bytes that do not form a valid protocol frame. The
    /// owner is expected to tear the session down.
    #[error("protocol parse error: {message}")]
    Parse { message: String },

    /// A socket operation failed with a non-transient OS error.
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// A connection was deliberately refused or dropped, e.g. during
    /// descriptor-exhaustion degraded mode.
    #[error("connection rejected: {reason}")]
    Rejected { reason: String },
}

impl Error {
    /// Convenience constructor for parse failures.
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse {
            message: message.into(),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
