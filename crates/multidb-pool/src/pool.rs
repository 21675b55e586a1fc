//! Per-host pool implementation.
//!
//! Each registered host gets its own [`HostPool`]: a bounded idle set, a
//! count of checked-out connections, and an explicit FIFO wait queue. The
//! wait queue makes the fairness contract concrete: waiters are served in
//! arrival order via direct handoff, and newly arriving acquirers never
//! barge past a queued waiter.
//!
//! Lock discipline: the pool's `parking_lot` mutex guards only the in-memory
//! state and is never held across an `.await`. All network work (connect,
//! ping, close) happens outside the lock under an enforced timeout.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;

use multidb_session::{HostDescriptor, QueryOutcome, Session, SessionError, SessionFactory};

use crate::config::PoolConfig;
use crate::error::PoolError;

/// An idle connection plus the timestamp the reaper ages it by.
struct IdleSession {
    session: Box<dyn Session>,
    last_used: Instant,
}

/// What a released slot hands to a queued waiter.
enum Handoff {
    /// A live session, still counted as checked out. Handoffs from an
    /// explicit release are validated first; drop-path handoffs are not.
    Session(Box<dyn Session>),
    /// A freed slot; the waiter establishes its own connection.
    Permit,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Handoff>,
}

/// Mutable pool state, guarded by the pool's own mutex.
///
/// Invariant: `outstanding + idle.len() <= config.max_connections`, where
/// `outstanding` counts checked-out connections plus slots reserved for an
/// in-flight connect.
struct PoolState {
    idle: VecDeque<IdleSession>,
    outstanding: u32,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
    closed: bool,
    /// Revocation flags of currently checked-out sessions; set on shutdown
    /// so callers still holding a session cannot keep using it.
    revocations: Vec<Weak<AtomicBool>>,
}

/// Cumulative per-pool counters.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MetricCounters {
    pub(crate) connections_created: u64,
    pub(crate) connections_closed: u64,
    pub(crate) checkouts_successful: u64,
    pub(crate) checkouts_failed: u64,
    pub(crate) validations_performed: u64,
    pub(crate) validations_failed: u64,
    pub(crate) idle_evictions: u64,
}

/// A bounded pool of connections to a single host.
pub(crate) struct HostPool {
    host_id: String,
    config: PoolConfig,
    factory: Arc<dyn SessionFactory>,
    descriptor: Mutex<HostDescriptor>,
    state: Mutex<PoolState>,
    metrics: Mutex<MetricCounters>,
}

/// What the locked section of `acquire` decided to do.
enum Plan {
    Reuse(Box<dyn Session>),
    Create,
    Wait(u64, oneshot::Receiver<Handoff>),
}

impl HostPool {
    pub(crate) fn new(
        descriptor: HostDescriptor,
        config: PoolConfig,
        factory: Arc<dyn SessionFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            host_id: descriptor.host_id.clone(),
            config,
            factory,
            descriptor: Mutex::new(descriptor),
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                outstanding: 0,
                waiters: VecDeque::new(),
                next_waiter_id: 0,
                closed: false,
                revocations: Vec::new(),
            }),
            metrics: Mutex::new(MetricCounters::default()),
        })
    }

    pub(crate) fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Replace the stored connection parameters. Live connections are
    /// untouched; the new descriptor applies to sessions created afterwards.
    pub(crate) fn set_descriptor(&self, descriptor: HostDescriptor) {
        *self.descriptor.lock() = descriptor;
    }

    pub(crate) fn descriptor_snapshot(&self) -> HostDescriptor {
        self.descriptor.lock().clone()
    }

    /// Acquire a connection, waiting at most `timeout` on a saturated pool.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<PooledSession, PoolError> {
        let deadline = Instant::now() + timeout;
        loop {
            let plan = {
                let mut st = self.state.lock();
                if st.closed {
                    drop(st);
                    self.metrics.lock().checkouts_failed += 1;
                    return Err(PoolError::Closed);
                }
                if !st.waiters.is_empty() {
                    // FIFO fairness: someone got here first, queue behind them.
                    let (id, rx) = enqueue_waiter(&mut st);
                    Plan::Wait(id, rx)
                } else if let Some(entry) = st.idle.pop_front() {
                    st.outstanding += 1;
                    Plan::Reuse(entry.session)
                } else if st.outstanding < self.config.max_connections {
                    st.outstanding += 1;
                    Plan::Create
                } else {
                    let (id, rx) = enqueue_waiter(&mut st);
                    Plan::Wait(id, rx)
                }
            };

            match plan {
                Plan::Reuse(mut session) => {
                    if self.validate(&mut session).await {
                        return self.checkout(session).await;
                    }
                    // Stale idle entry: discard it, free the slot, retry
                    // against whatever capacity is left.
                    tracing::debug!(
                        host = %self.host_id,
                        "idle connection failed validation, discarding"
                    );
                    self.close_session(session).await;
                    self.surrender_slot();
                    if Instant::now() >= deadline {
                        self.metrics.lock().checkouts_failed += 1;
                        return Err(PoolError::Exhausted { waited: timeout });
                    }
                }
                Plan::Create => return self.connect_new().await,
                Plan::Wait(id, mut rx) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match tokio::time::timeout(remaining, &mut rx).await {
                        Ok(Ok(Handoff::Session(session))) => {
                            return self.checkout(session).await;
                        }
                        Ok(Ok(Handoff::Permit)) => return self.connect_new().await,
                        Ok(Err(_)) => {
                            // Sender dropped without a handoff: pool shutdown.
                            self.metrics.lock().checkouts_failed += 1;
                            return Err(PoolError::Closed);
                        }
                        Err(_) => {
                            // Timed out. Remove ourselves from the queue, and
                            // restore any handoff that raced with the timeout
                            // so a released connection is never lost.
                            match self.cancel_waiter(id, &mut rx) {
                                Some(Handoff::Session(session)) => {
                                    if let Some(session) = self.check_in(session) {
                                        self.close_session(session).await;
                                    }
                                }
                                Some(Handoff::Permit) => self.surrender_slot(),
                                None => {}
                            }
                            self.metrics.lock().checkouts_failed += 1;
                            return Err(PoolError::Exhausted { waited: timeout });
                        }
                    }
                }
            }
        }
    }

    /// Establish a new session against a slot already reserved in
    /// `outstanding`. On failure the slot is passed on, not leaked.
    async fn connect_new(self: &Arc<Self>) -> Result<PooledSession, PoolError> {
        let descriptor = self.descriptor.lock().clone();
        let connect = self.factory.connect(&descriptor);
        match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(session)) => {
                self.metrics.lock().connections_created += 1;
                tracing::debug!(
                    host = %self.host_id,
                    address = %descriptor.address,
                    "connection created"
                );
                self.checkout(session).await
            }
            Ok(Err(e)) => {
                tracing::warn!(host = %self.host_id, error = %e, "connection establishment failed");
                self.surrender_slot();
                self.metrics.lock().checkouts_failed += 1;
                Err(PoolError::Connect(e))
            }
            Err(_) => {
                tracing::warn!(host = %self.host_id, "connection establishment timed out");
                self.surrender_slot();
                self.metrics.lock().checkouts_failed += 1;
                Err(PoolError::Connect(SessionError::Timeout {
                    operation: "connect",
                    limit: self.config.connect_timeout,
                }))
            }
        }
    }

    /// Wrap a session (already counted in `outstanding`) into a caller
    /// guard, registering its revocation flag with the pool.
    async fn checkout(
        self: &Arc<Self>,
        session: Box<dyn Session>,
    ) -> Result<PooledSession, PoolError> {
        let revoked = Arc::new(AtomicBool::new(false));
        // The await below must sit outside the guard's lexical scope, or the
        // async fn loses `Send` (the compiler tracks guard liveness by scope,
        // not by explicit drop).
        let closed = {
            let mut st = self.state.lock();
            if st.closed {
                true
            } else {
                st.revocations.retain(|w| w.strong_count() > 0);
                st.revocations.push(Arc::downgrade(&revoked));
                false
            }
        };
        if closed {
            // Shut down while the session was in flight to us.
            self.close_session(session).await;
            self.metrics.lock().checkouts_failed += 1;
            return Err(PoolError::Closed);
        }
        self.metrics.lock().checkouts_successful += 1;
        tracing::trace!(host = %self.host_id, "connection checked out");
        Ok(PooledSession {
            session: Some(session),
            revoked,
            pool: Arc::clone(self),
        })
    }

    /// Remove waiter `id` from the queue. If a handoff was already sent
    /// (the send happens under the state lock, so absence from the queue
    /// means the value is in the channel), drain and return it.
    fn cancel_waiter(
        &self,
        id: u64,
        rx: &mut oneshot::Receiver<Handoff>,
    ) -> Option<Handoff> {
        let mut st = self.state.lock();
        if let Some(pos) = st.waiters.iter().position(|w| w.id == id) {
            st.waiters.remove(pos);
            return None;
        }
        drop(st);
        rx.try_recv().ok()
    }

    /// Return a live session to the pool: direct handoff to the first
    /// still-waiting acquirer, otherwise into the idle set.
    ///
    /// Returns the session back when the pool is closed; the caller must
    /// close it.
    fn check_in(&self, session: Box<dyn Session>) -> Option<Box<dyn Session>> {
        let mut st = self.state.lock();
        if st.closed {
            return Some(session);
        }
        let mut session = session;
        while let Some(waiter) = st.waiters.pop_front() {
            match waiter.tx.send(Handoff::Session(session)) {
                Ok(()) => return None,
                // Waiter gave up between enqueueing and being served; its
                // cancellation will find the queue without it and move on.
                Err(Handoff::Session(returned)) => session = returned,
                // Unreachable: send returns the payload we passed in.
                Err(Handoff::Permit) => return None,
            }
        }
        st.outstanding = st.outstanding.saturating_sub(1);
        st.idle.push_back(IdleSession {
            session,
            last_used: Instant::now(),
        });
        None
    }

    /// Give up a reserved slot: pass it to the first live waiter as a
    /// create-permit, or fold it back into the free count.
    fn surrender_slot(&self) {
        let mut st = self.state.lock();
        if st.closed {
            return;
        }
        while let Some(waiter) = st.waiters.pop_front() {
            if waiter.tx.send(Handoff::Permit).is_ok() {
                return;
            }
        }
        st.outstanding = st.outstanding.saturating_sub(1);
    }

    /// Liveness-check a session under the configured ping timeout.
    /// Never errors; any failure means "not live".
    async fn validate(&self, session: &mut Box<dyn Session>) -> bool {
        let live = matches!(
            tokio::time::timeout(self.config.validate_timeout, session.ping()).await,
            Ok(Ok(()))
        );
        let mut metrics = self.metrics.lock();
        metrics.validations_performed += 1;
        if !live {
            metrics.validations_failed += 1;
        }
        live
    }

    /// Close a session's transport, bounded by the close timeout.
    /// Best-effort: failures are logged, never propagated.
    async fn close_session(&self, mut session: Box<dyn Session>) {
        match tokio::time::timeout(self.config.close_timeout, session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(host = %self.host_id, error = %e, "error closing connection");
            }
            Err(_) => {
                tracing::warn!(host = %self.host_id, "closing connection timed out");
            }
        }
        self.metrics.lock().connections_closed += 1;
    }

    /// Close a session from a sync context (guard drop). Spawned onto the
    /// runtime when one is available; otherwise the transport closes with
    /// the drop itself.
    fn close_detached(self: &Arc<Self>, session: Box<dyn Session>) {
        match Handle::try_current() {
            Ok(handle) => {
                let pool = Arc::clone(self);
                handle.spawn(async move {
                    pool.close_session(session).await;
                });
            }
            Err(_) => {
                self.metrics.lock().connections_closed += 1;
            }
        }
    }

    /// Close every idle session whose age exceeds `max_idle`.
    ///
    /// Entries are detached under the lock; the (possibly slow) transport
    /// closes happen after it is released, so the reaper cannot stall
    /// acquirers. Returns the number of evicted sessions.
    pub(crate) async fn evict_idle(&self, max_idle: Duration) -> usize {
        let expired: Vec<Box<dyn Session>> = {
            let mut st = self.state.lock();
            if st.closed {
                return 0;
            }
            let mut keep = VecDeque::with_capacity(st.idle.len());
            let mut expired = Vec::new();
            while let Some(entry) = st.idle.pop_front() {
                if entry.last_used.elapsed() > max_idle {
                    expired.push(entry.session);
                } else {
                    keep.push_back(entry);
                }
            }
            st.idle = keep;
            expired
        };
        let evicted = expired.len();
        for session in expired {
            self.close_session(session).await;
        }
        if evicted > 0 {
            self.metrics.lock().idle_evictions += evicted as u64;
            tracing::debug!(host = %self.host_id, evicted, "evicted idle connections");
        }
        evicted
    }

    /// Shut the pool down: fail all waiters, close all idle sessions,
    /// revoke all checked-out sessions. Terminal; subsequent acquires fail
    /// with [`PoolError::Closed`].
    pub(crate) async fn shutdown(&self) {
        let (idle, waiters, revocations) = {
            let mut st = self.state.lock();
            if st.closed {
                return;
            }
            st.closed = true;
            (
                std::mem::take(&mut st.idle),
                std::mem::take(&mut st.waiters),
                std::mem::take(&mut st.revocations),
            )
        };
        // Dropping the senders resolves every queued acquire with Closed.
        let waiters_failed = waiters.len();
        drop(waiters);
        let mut revoked = 0usize;
        for flag in &revocations {
            if let Some(flag) = flag.upgrade() {
                flag.store(true, Ordering::Release);
                revoked += 1;
            }
        }
        let idle_closed = idle.len();
        for entry in idle {
            self.close_session(entry.session).await;
        }
        tracing::info!(
            host = %self.host_id,
            idle_closed,
            waiters_failed,
            revoked,
            "per-host pool shut down"
        );
    }

    /// Current occupancy snapshot.
    pub(crate) fn status(&self) -> PoolStatus {
        let st = self.state.lock();
        let available = st.idle.len() as u32;
        PoolStatus {
            available,
            in_use: st.outstanding,
            total: available + st.outstanding,
            max: self.config.max_connections,
        }
    }

    pub(crate) fn counters(&self) -> MetricCounters {
        *self.metrics.lock()
    }
}

/// Status information about one per-host pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently checked out (or being created).
    pub in_use: u32,
    /// Total live connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Metrics aggregated across all per-host pools.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since manager start.
    pub connections_created: u64,
    /// Total connections closed since manager start.
    pub connections_closed: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Failed connection checkouts (timeouts, connect errors, closed pool).
    pub checkouts_failed: u64,
    /// Liveness validations performed.
    pub validations_performed: u64,
    /// Liveness validations that failed.
    pub validations_failed: u64,
    /// Idle connections evicted by the reaper (or explicit eviction).
    pub idle_evictions: u64,
    /// Time since the manager was created.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Calculate validation success rate (0.0 to 1.0).
    #[must_use]
    pub fn validation_success_rate(&self) -> f64 {
        if self.validations_performed == 0 {
            return 1.0;
        }
        let successful = self.validations_performed - self.validations_failed;
        successful as f64 / self.validations_performed as f64
    }
}

fn enqueue_waiter(st: &mut PoolState) -> (u64, oneshot::Receiver<Handoff>) {
    let id = st.next_waiter_id;
    st.next_waiter_id += 1;
    let (tx, rx) = oneshot::channel();
    st.waiters.push_back(Waiter { id, tx });
    (id, rx)
}

/// A connection checked out from the pool.
///
/// Dropping the guard returns the connection to its pool, so release is
/// reachable from every exit path of the caller. Prefer
/// [`release()`](PooledSession::release) where possible: the explicit path
/// validates the connection and discards it if the server side died, while
/// the drop path returns it as-is and leaves validation to the next
/// acquire.
pub struct PooledSession {
    session: Option<Box<dyn Session>>,
    revoked: Arc<AtomicBool>,
    pool: Arc<HostPool>,
}

impl PooledSession {
    /// Identifier of the host this connection belongs to.
    #[must_use]
    pub fn host_id(&self) -> &str {
        self.pool.host_id()
    }

    /// Execute a statement on this connection.
    ///
    /// Fails with [`SessionError::Revoked`] if the pool was shut down while
    /// the connection was checked out.
    pub async fn execute(&mut self, statement: &str) -> Result<QueryOutcome, SessionError> {
        if self.revoked.load(Ordering::Acquire) {
            return Err(SessionError::Revoked);
        }
        match self.session.as_mut() {
            Some(session) => session.execute(statement).await,
            None => Err(SessionError::Closed),
        }
    }

    /// Return the connection to the pool.
    ///
    /// The connection is validated first: a dead connection is closed and
    /// its slot freed instead of being recycled. A live one is handed
    /// directly to the first waiting acquirer, or parked in the idle set.
    pub async fn release(mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        let pool = Arc::clone(&self.pool);
        if self.revoked.load(Ordering::Acquire) {
            pool.close_session(session).await;
            return;
        }
        if pool.validate(&mut session).await {
            if let Some(session) = pool.check_in(session) {
                // Pool closed while we held the connection.
                pool.close_session(session).await;
            }
        } else {
            tracing::debug!(
                host = %pool.host_id,
                "released connection failed validation, discarding"
            );
            pool.close_session(session).await;
            pool.surrender_slot();
        }
    }
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("host_id", &self.pool.host_id)
            .field("revoked", &self.revoked.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        tracing::trace!(host = %self.pool.host_id, "returning connection to pool");
        if self.revoked.load(Ordering::Acquire) {
            self.pool.close_detached(session);
            return;
        }
        if let Some(session) = self.pool.check_in(session) {
            self.pool.close_detached(session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_status_utilization() {
        let status = PoolStatus {
            available: 5,
            in_use: 5,
            total: 10,
            max: 20,
        };
        assert!((status.utilization() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_status_at_capacity() {
        let status = PoolStatus {
            available: 0,
            in_use: 10,
            total: 10,
            max: 10,
        };
        assert!(status.is_at_capacity());

        let status2 = PoolStatus {
            available: 5,
            in_use: 5,
            total: 10,
            max: 20,
        };
        assert!(!status2.is_at_capacity());
    }

    #[test]
    fn test_pool_metrics_success_rates() {
        let metrics = PoolMetrics {
            connections_created: 10,
            connections_closed: 2,
            checkouts_successful: 90,
            checkouts_failed: 10,
            validations_performed: 100,
            validations_failed: 5,
            idle_evictions: 3,
            uptime: Duration::from_secs(3600),
        };

        assert!((metrics.checkout_success_rate() - 0.9).abs() < f64::EPSILON);
        assert!((metrics.validation_success_rate() - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_metrics_rates_with_no_activity() {
        let metrics = PoolMetrics {
            connections_created: 0,
            connections_closed: 0,
            checkouts_successful: 0,
            checkouts_failed: 0,
            validations_performed: 0,
            validations_failed: 0,
            idle_evictions: 0,
            uptime: Duration::ZERO,
        };
        assert!((metrics.checkout_success_rate() - 1.0).abs() < f64::EPSILON);
        assert!((metrics.validation_success_rate() - 1.0).abs() < f64::EPSILON);
    }
}
