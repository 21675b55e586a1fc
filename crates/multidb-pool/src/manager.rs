//! The pool manager: host registry plus routing.
//!
//! One manager owns every per-host pool in the process. It is explicitly
//! constructed and explicitly torn down with [`PoolManager::shutdown_all`];
//! collaborators hold it by reference or clone the cheap handle. There is
//! no hidden global instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use multidb_session::{HostDescriptor, SessionFactory};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::pool::{HostPool, MetricCounters, PoolMetrics, PoolStatus, PooledSession};
use crate::reaper;

pub(crate) struct ManagerInner {
    pub(crate) config: PoolConfig,
    factory: Arc<dyn SessionFactory>,
    pub(crate) pools: RwLock<HashMap<String, Arc<HostPool>>>,
    pub(crate) closed: AtomicBool,
    created_at: Instant,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

/// Routes acquire/release calls to per-host pools and runs the idle reaper.
///
/// # Example
///
/// ```rust,ignore
/// use multidb_pool::{PoolConfig, PoolManager};
/// use multidb_session::HostDescriptor;
///
/// let manager = PoolManager::builder()
///     .factory(factory)
///     .config(PoolConfig::new().max_connections(8))
///     .build()
///     .await?;
///
/// manager.register_host(HostDescriptor::new("primary", "10.0.4.11"))?;
///
/// let mut conn = manager.acquire("primary").await?;
/// let outcome = conn.execute("SELECT 1").await?;
/// conn.release().await;
///
/// manager.shutdown_all().await;
/// ```
#[derive(Clone)]
pub struct PoolManager {
    inner: Arc<ManagerInner>,
}

impl PoolManager {
    /// Create a manager builder.
    #[must_use]
    pub fn builder() -> PoolManagerBuilder {
        PoolManagerBuilder::new()
    }

    /// Create a manager with the given configuration and session factory,
    /// and start its idle reaper.
    pub async fn new(
        config: PoolConfig,
        factory: Arc<dyn SessionFactory>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let inner = Arc::new(ManagerInner {
            config: config.clone(),
            factory,
            pools: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
            reaper: Mutex::new(None),
        });
        *inner.reaper.lock() = Some(reaper::spawn(&inner));

        tracing::info!(
            max_connections = config.max_connections,
            max_idle_secs = config.max_idle_time.as_secs(),
            reap_interval_secs = config.reap_interval.as_secs(),
            "pool manager created"
        );

        Ok(Self { inner })
    }

    /// Register (or re-register) a host.
    ///
    /// The first registration for a `host_id` creates an empty per-host
    /// pool with the configured cap; re-registration overwrites the stored
    /// connection parameters without touching live connections. Idempotent,
    /// safe to call before every operation.
    pub fn register_host(&self, descriptor: HostDescriptor) -> Result<(), PoolError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        let host_id = descriptor.host_id.clone();
        let mut pools = self.inner.pools.write();
        match pools.get(&host_id) {
            Some(pool) => pool.set_descriptor(descriptor),
            None => {
                let pool = HostPool::new(
                    descriptor,
                    self.inner.config.clone(),
                    Arc::clone(&self.inner.factory),
                );
                pools.insert(host_id.clone(), pool);
                tracing::debug!(host = %host_id, "host registered");
            }
        }
        Ok(())
    }

    /// Acquire a connection to `host_id`, waiting up to the configured
    /// acquire timeout on a saturated pool.
    pub async fn acquire(&self, host_id: &str) -> Result<PooledSession, PoolError> {
        self.acquire_with_timeout(host_id, self.inner.config.acquire_timeout)
            .await
    }

    /// Acquire a connection with an explicit wait timeout.
    pub async fn acquire_with_timeout(
        &self,
        host_id: &str,
        timeout: Duration,
    ) -> Result<PooledSession, PoolError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        let pool = self.pool_for(host_id)?;
        pool.acquire(timeout).await
    }

    /// Return a connection to the pool that owns it.
    ///
    /// Equivalent to [`PooledSession::release`]; the guard carries its own
    /// pool handle, so the manager only delegates.
    pub async fn release(&self, session: PooledSession) {
        session.release().await;
    }

    /// Close every idle connection of `host_id` older than `max_idle`.
    ///
    /// The reaper does this on its own interval with the configured
    /// `max_idle_time`; this entry point exists for explicit reclamation.
    pub async fn evict_idle(&self, host_id: &str, max_idle: Duration) -> Result<usize, PoolError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        let pool = self.pool_for(host_id)?;
        Ok(pool.evict_idle(max_idle).await)
    }

    /// Shut down one host's pool: fail its waiters, close its idle
    /// connections, revoke its checked-out connections.
    ///
    /// The host stays registered. A fresh pool is installed under the same
    /// descriptor, so a later acquire re-creates connections.
    pub async fn shutdown_host(&self, host_id: &str) -> Result<(), PoolError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        let pool = self.pool_for(host_id)?;
        pool.shutdown().await;

        if !self.inner.closed.load(Ordering::Acquire) {
            let descriptor = {
                let pools = self.inner.pools.read();
                pools.get(host_id).map(|p| p.descriptor_snapshot())
            };
            if let Some(descriptor) = descriptor {
                let fresh = HostPool::new(
                    descriptor,
                    self.inner.config.clone(),
                    Arc::clone(&self.inner.factory),
                );
                self.inner.pools.write().insert(host_id.to_string(), fresh);
            }
        }
        Ok(())
    }

    /// Shut down every pool and stop the reaper. Terminal: subsequent
    /// operations fail with [`PoolError::Closed`].
    pub async fn shutdown_all(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.inner.reaper.lock().take() {
            handle.abort();
        }
        let pools: Vec<Arc<HostPool>> = {
            let mut map = self.inner.pools.write();
            map.drain().map(|(_, pool)| pool).collect()
        };
        for pool in pools {
            pool.shutdown().await;
        }
        tracing::info!("pool manager shut down");
    }

    /// Whether `shutdown_all` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Occupancy snapshot for one host, or `None` if it is not registered.
    #[must_use]
    pub fn status(&self, host_id: &str) -> Option<PoolStatus> {
        self.inner.pools.read().get(host_id).map(|p| p.status())
    }

    /// Metrics aggregated across every per-host pool.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let mut total = MetricCounters::default();
        for pool in self.inner.pools.read().values() {
            let c = pool.counters();
            total.connections_created += c.connections_created;
            total.connections_closed += c.connections_closed;
            total.checkouts_successful += c.checkouts_successful;
            total.checkouts_failed += c.checkouts_failed;
            total.validations_performed += c.validations_performed;
            total.validations_failed += c.validations_failed;
            total.idle_evictions += c.idle_evictions;
        }
        PoolMetrics {
            connections_created: total.connections_created,
            connections_closed: total.connections_closed,
            checkouts_successful: total.checkouts_successful,
            checkouts_failed: total.checkouts_failed,
            validations_performed: total.validations_performed,
            validations_failed: total.validations_failed,
            idle_evictions: total.idle_evictions,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    fn pool_for(&self, host_id: &str) -> Result<Arc<HostPool>, PoolError> {
        self.inner
            .pools
            .read()
            .get(host_id)
            .cloned()
            .ok_or_else(|| PoolError::UnknownHost(host_id.to_string()))
    }
}

/// Builder for creating a [`PoolManager`].
pub struct PoolManagerBuilder {
    config: PoolConfig,
    factory: Option<Arc<dyn SessionFactory>>,
}

impl PoolManagerBuilder {
    /// Create a builder with default pool configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
            factory: None,
        }
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the session factory the pools connect through.
    #[must_use]
    pub fn factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Build the manager and start its reaper.
    pub async fn build(self) -> Result<PoolManager, PoolError> {
        let factory = self
            .factory
            .ok_or_else(|| PoolError::Config("a session factory is required".into()))?;
        PoolManager::new(self.config, factory).await
    }
}

impl Default for PoolManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multidb_session::{Session, SessionError};

    struct StubFactory;

    #[async_trait::async_trait]
    impl SessionFactory for StubFactory {
        async fn connect(
            &self,
            _descriptor: &HostDescriptor,
        ) -> Result<Box<dyn Session>, SessionError> {
            Err(SessionError::Protocol("stub factory".into()))
        }
    }

    #[test]
    fn test_builder_requires_factory() {
        let result = tokio_test::block_on(PoolManagerBuilder::new().build());
        assert!(matches!(result, Err(PoolError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = tokio_test::block_on(
            PoolManager::builder()
                .factory(Arc::new(StubFactory))
                .config(PoolConfig::new().max_connections(0))
                .build(),
        );
        assert!(matches!(result, Err(PoolError::Config(_))));
    }

    #[test]
    fn test_status_for_unknown_host_is_none() {
        tokio_test::block_on(async {
            let manager = PoolManager::builder()
                .factory(Arc::new(StubFactory))
                .build()
                .await;
            let Ok(manager) = manager else {
                // Default config is valid; new() cannot fail here.
                return;
            };
            assert!(manager.status("nope").is_none());
            manager.shutdown_all().await;
        });
    }
}
