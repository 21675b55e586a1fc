//! Background idle-connection reaper.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::manager::ManagerInner;
use crate::pool::HostPool;

/// Spawn the reaper task for a manager.
///
/// The task holds only a weak reference and exits when the manager is
/// dropped or shut down. Each tick snapshots the pool handles and evicts
/// idle connections older than `max_idle_time`; one pool's slow or failed
/// close never aborts the scan of the remaining pools (closes are bounded
/// and swallowed inside [`HostPool::evict_idle`]).
pub(crate) fn spawn(inner: &Arc<ManagerInner>) -> JoinHandle<()> {
    let weak: Weak<ManagerInner> = Arc::downgrade(inner);
    let interval = inner.config.reap_interval;
    let max_idle = inner.config.max_idle_time;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let Some(manager) = weak.upgrade() else {
                break;
            };
            if manager.closed.load(Ordering::Acquire) {
                break;
            }

            let pools: Vec<Arc<HostPool>> = manager.pools.read().values().cloned().collect();
            drop(manager);

            for pool in pools {
                pool.evict_idle(max_idle).await;
            }
            tracing::trace!("idle reaper scan complete");
        }
        tracing::debug!("idle reaper stopped");
    })
}
