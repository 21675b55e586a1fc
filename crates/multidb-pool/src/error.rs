//! Pool error types.

use std::time::Duration;

use thiserror::Error;

use multidb_session::SessionError;

/// Errors surfaced to callers of the pool.
///
/// Validation failures are deliberately absent: a connection that fails its
/// liveness check is discarded and replaced inside `acquire`, never reported
/// as a distinct error.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Acquire on a host that was never registered. A programming error in
    /// the caller, surfaced immediately.
    #[error("unknown host: {0}")]
    UnknownHost(String),

    /// Establishing a new session failed. Not retried internally; the
    /// caller decides whether and when to retry.
    #[error("failed to establish connection: {0}")]
    Connect(#[source] SessionError),

    /// Timed out waiting for a free slot on a saturated pool. Safe to
    /// retry with backoff.
    #[error("connection pool exhausted: no slot freed within {waited:?}")]
    Exhausted {
        /// How long the caller waited.
        waited: Duration,
    },

    /// Operation on a pool that has been shut down.
    #[error("connection pool is closed")]
    Closed,

    /// Rejected configuration value.
    #[error("invalid pool configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_host_names_the_host() {
        let err = PoolError::UnknownHost("staging-7".into());
        assert!(err.to_string().contains("staging-7"));
    }

    #[test]
    fn test_connect_preserves_source() {
        use std::error::Error as _;
        let err = PoolError::Connect(SessionError::Auth("bad password".into()));
        assert!(err.source().is_some());
    }
}
