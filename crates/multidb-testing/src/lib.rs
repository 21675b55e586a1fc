//! # multidb-testing
//!
//! In-memory [`Session`]/[`SessionFactory`] implementations for exercising
//! the connection pool without a database server.
//!
//! [`MemoryFactory`] hands out [`MemorySession`]s and records everything a
//! pool test wants to assert on: how many connections were attempted and
//! established, how many statements ran concurrently at peak, and whether
//! any session was ever driven from two tasks at once. Failure injection
//! covers the interesting paths: scripted connect failures, artificial
//! connect/ping latency, and killing live sessions to simulate a server
//! dropping its end.
//!
//! ## Example
//!
//! ```rust,ignore
//! let factory = Arc::new(MemoryFactory::new());
//! factory.fail_next_connects(1);           // next connect errors
//! factory.kill_all();                      // live sessions go dead
//! assert_eq!(factory.connections_established(), 3);
//! assert!(!factory.double_use_detected());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use multidb_session::{
    HostDescriptor, QueryOutcome, Session, SessionError, SessionFactory, Value,
};

/// Shared state of one in-memory session.
struct SessionState {
    id: u64,
    alive: AtomicBool,
    busy: AtomicBool,
    pings: AtomicU64,
    closes: AtomicU64,
}

/// Shared state behind a [`MemoryFactory`] and all its sessions.
struct FactoryState {
    next_id: AtomicU64,
    connects_attempted: AtomicU64,
    connects_established: AtomicU64,
    fail_connects: AtomicU64,
    connect_delay: Mutex<Duration>,
    ping_delay: Mutex<Duration>,
    sessions: Mutex<Vec<Arc<SessionState>>>,
    connect_log: Mutex<Vec<String>>,
    active_executions: AtomicU64,
    max_active_executions: AtomicU64,
    double_use: AtomicBool,
}

/// An in-memory session factory with failure injection and counters.
#[derive(Clone)]
pub struct MemoryFactory {
    state: Arc<FactoryState>,
}

impl MemoryFactory {
    /// Create a factory with no injected failures or delays.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(FactoryState {
                next_id: AtomicU64::new(1),
                connects_attempted: AtomicU64::new(0),
                connects_established: AtomicU64::new(0),
                fail_connects: AtomicU64::new(0),
                connect_delay: Mutex::new(Duration::ZERO),
                ping_delay: Mutex::new(Duration::ZERO),
                sessions: Mutex::new(Vec::new()),
                connect_log: Mutex::new(Vec::new()),
                active_executions: AtomicU64::new(0),
                max_active_executions: AtomicU64::new(0),
                double_use: AtomicBool::new(false),
            }),
        }
    }

    /// Fail the next `n` connect calls with an authentication error.
    pub fn fail_next_connects(&self, n: u64) {
        self.state.fail_connects.store(n, Ordering::Release);
    }

    /// Delay every connect by `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock() = delay;
    }

    /// Delay every ping by `delay` (to exercise bounded validation).
    pub fn set_ping_delay(&self, delay: Duration) {
        *self.state.ping_delay.lock() = delay;
    }

    /// Mark every session created so far as dead: pings and statements
    /// fail until the session is discarded.
    pub fn kill_all(&self) {
        for session in self.state.sessions.lock().iter() {
            session.alive.store(false, Ordering::Release);
        }
    }

    /// Total connect calls, including injected failures.
    #[must_use]
    pub fn connections_attempted(&self) -> u64 {
        self.state.connects_attempted.load(Ordering::Acquire)
    }

    /// Connect calls that produced a live session.
    #[must_use]
    pub fn connections_established(&self) -> u64 {
        self.state.connects_established.load(Ordering::Acquire)
    }

    /// Sessions whose transport was closed.
    #[must_use]
    pub fn connections_closed(&self) -> u64 {
        self.state
            .sessions
            .lock()
            .iter()
            .filter(|s| s.closes.load(Ordering::Acquire) > 0)
            .count() as u64
    }

    /// Sessions still alive and not closed.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.state
            .sessions
            .lock()
            .iter()
            .filter(|s| s.alive.load(Ordering::Acquire))
            .count()
    }

    /// Total pings served across all sessions.
    #[must_use]
    pub fn pings(&self) -> u64 {
        self.state
            .sessions
            .lock()
            .iter()
            .map(|s| s.pings.load(Ordering::Acquire))
            .sum()
    }

    /// Peak number of statements executing simultaneously.
    #[must_use]
    pub fn max_concurrent_executions(&self) -> u64 {
        self.state.max_active_executions.load(Ordering::Acquire)
    }

    /// Whether any single session was ever driven from two tasks at once.
    #[must_use]
    pub fn double_use_detected(&self) -> bool {
        self.state.double_use.load(Ordering::Acquire)
    }

    /// Addresses passed to `connect`, in call order.
    #[must_use]
    pub fn connect_log(&self) -> Vec<String> {
        self.state.connect_log.lock().clone()
    }
}

impl Default for MemoryFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionFactory for MemoryFactory {
    async fn connect(
        &self,
        descriptor: &HostDescriptor,
    ) -> Result<Box<dyn Session>, SessionError> {
        self.state.connects_attempted.fetch_add(1, Ordering::AcqRel);
        self.state.connect_log.lock().push(descriptor.address.clone());

        let delay = *self.state.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let should_fail = self
            .state
            .fail_connects
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(SessionError::Auth("injected connect failure".into()));
        }

        let session = Arc::new(SessionState {
            id: self.state.next_id.fetch_add(1, Ordering::AcqRel),
            alive: AtomicBool::new(true),
            busy: AtomicBool::new(false),
            pings: AtomicU64::new(0),
            closes: AtomicU64::new(0),
        });
        self.state.sessions.lock().push(Arc::clone(&session));
        self.state
            .connects_established
            .fetch_add(1, Ordering::AcqRel);

        Ok(Box::new(MemorySession {
            session,
            factory: Arc::clone(&self.state),
        }))
    }
}

/// An in-memory session handed out by [`MemoryFactory`].
pub struct MemorySession {
    session: Arc<SessionState>,
    factory: Arc<FactoryState>,
}

impl MemorySession {
    /// Identifier of this session, unique per factory.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.session.id
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn execute(&mut self, statement: &str) -> Result<QueryOutcome, SessionError> {
        if !self.session.alive.load(Ordering::Acquire) {
            return Err(SessionError::Protocol("connection lost".into()));
        }
        if self.session.busy.swap(true, Ordering::AcqRel) {
            self.factory.double_use.store(true, Ordering::Release);
        }

        let active = self.factory.active_executions.fetch_add(1, Ordering::AcqRel) + 1;
        self.factory
            .max_active_executions
            .fetch_max(active, Ordering::AcqRel);

        // Widen the race window so interleaving bugs actually surface.
        tokio::task::yield_now().await;

        let outcome = if statement.trim_start().to_ascii_lowercase().starts_with("select") {
            QueryOutcome::Rows {
                columns: vec!["value".to_string()],
                rows: vec![vec![Value::Int(1)]],
            }
        } else {
            QueryOutcome::Affected(1)
        };

        self.factory.active_executions.fetch_sub(1, Ordering::AcqRel);
        self.session.busy.store(false, Ordering::Release);
        Ok(outcome)
    }

    async fn ping(&mut self) -> Result<(), SessionError> {
        let delay = *self.factory.ping_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.session.pings.fetch_add(1, Ordering::AcqRel);
        if self.session.alive.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SessionError::Protocol("connection lost".into()))
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.session.alive.store(false, Ordering::Release);
        self.session.closes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_failure_injection() {
        let factory = MemoryFactory::new();
        factory.fail_next_connects(1);
        let descriptor = HostDescriptor::new("h1", "localhost");

        assert!(factory.connect(&descriptor).await.is_err());
        assert!(factory.connect(&descriptor).await.is_ok());
        assert_eq!(factory.connections_attempted(), 2);
        assert_eq!(factory.connections_established(), 1);
    }

    #[tokio::test]
    async fn test_killed_session_fails_ping_and_execute() {
        let factory = MemoryFactory::new();
        let descriptor = HostDescriptor::new("h1", "localhost");
        let mut session = factory.connect(&descriptor).await.unwrap();

        assert!(session.ping().await.is_ok());
        factory.kill_all();
        assert!(session.ping().await.is_err());
        assert!(session.execute("SELECT 1").await.is_err());
    }

    #[tokio::test]
    async fn test_select_returns_rows() {
        let factory = MemoryFactory::new();
        let descriptor = HostDescriptor::new("h1", "localhost");
        let mut session = factory.connect(&descriptor).await.unwrap();

        match session.execute("SELECT 1").await {
            Ok(QueryOutcome::Rows { columns, rows }) => {
                assert_eq!(columns, vec!["value".to_string()]);
                assert_eq!(rows.len(), 1);
            }
            other => panic!("expected rows, got {other:?}"),
        }
        match session.execute("DELETE FROM t").await {
            Ok(QueryOutcome::Affected(n)) => assert_eq!(n, 1),
            other => panic!("expected affected count, got {other:?}"),
        }
    }
}
