//! Session-level error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur on a single session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// IO error on the underlying transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A bounded network operation exceeded its time limit.
    #[error("{operation} timed out after {limit:?}")]
    Timeout {
        /// Operation that timed out (`connect`, `execute`, `ping`, `close`).
        operation: &'static str,
        /// Enforced time limit.
        limit: Duration,
    },

    /// The server rejected the supplied credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server sent something the driver could not make sense of.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The pool revoked this session (host or pool shutdown) while a
    /// caller still held it.
    #[error("session revoked by pool shutdown")]
    Revoked,

    /// Operation on a session that was already closed.
    #[error("session closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_names_operation() {
        let err = SessionError::Timeout {
            operation: "ping",
            limit: Duration::from_secs(5),
        };
        assert!(err.to_string().contains("ping"));
    }
}
