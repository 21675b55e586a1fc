//! # multidb-pool
//!
//! A bounded, multi-host database connection pool.
//!
//! One [`PoolManager`] owns an independent per-host pool for every
//! registered host. Acquire routes to the matching pool, which reuses an
//! idle connection, opens a new one under the per-host cap, or queues the
//! caller in an explicit FIFO wait queue. Release validates the connection
//! and hands it directly to the first waiter, or parks it in the idle set.
//! A background reaper closes connections idle beyond a threshold.
//!
//! ## Guarantees
//!
//! - Per host, `checked_out + idle <= max_connections` at every instant.
//! - Waiters on a saturated pool are served first-come-first-served; new
//!   acquirers never barge past a queued waiter.
//! - A waiter that times out removes itself atomically; a connection
//!   released in that window goes back to the pool, never lost.
//! - All network operations (connect, ping, close) run under enforced
//!   timeouts, and never while a pool lock is held.
//! - Release is reachable from every caller exit path: dropping a
//!   [`PooledSession`] returns the connection.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use multidb_pool::{PoolConfig, PoolManager};
//! use multidb_session::HostDescriptor;
//!
//! let manager = PoolManager::builder()
//!     .factory(Arc::new(my_driver_factory))
//!     .config(PoolConfig::new().max_connections(8))
//!     .build()
//!     .await?;
//!
//! manager.register_host(HostDescriptor::new("orders", "10.0.4.11").username("app"))?;
//!
//! let mut conn = manager.acquire("orders").await?;
//! let outcome = conn.execute("SELECT id FROM orders LIMIT 10").await?;
//! conn.release().await;
//!
//! manager.shutdown_all().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod manager;
pub mod pool;
mod reaper;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::PoolError;

// Manager types
pub use manager::{PoolManager, PoolManagerBuilder};

// Pool types
pub use pool::{PoolMetrics, PoolStatus, PooledSession};

// The session seam, re-exported for convenience.
pub use multidb_session::{HostDescriptor, QueryOutcome, Session, SessionError, SessionFactory};
