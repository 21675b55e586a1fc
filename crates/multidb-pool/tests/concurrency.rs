//! Concurrency and invariant tests.
//!
//! The cap test hammers one pool from many tasks on a multi-threaded
//! runtime; the proptest drives a single pool through arbitrary
//! acquire/release/drop/evict sequences and checks the occupancy invariant
//! after every step.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use multidb_pool::{PoolConfig, PoolManager, PooledSession};
use multidb_session::HostDescriptor;
use multidb_testing::MemoryFactory;
use proptest::prelude::*;

async fn manager_with(config: PoolConfig) -> (PoolManager, MemoryFactory) {
    let factory = MemoryFactory::new();
    let manager = PoolManager::builder()
        .factory(Arc::new(factory.clone()))
        .config(config)
        .build()
        .await
        .unwrap();
    (manager, factory)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_cycles_never_exceed_cap() {
    const TASKS: usize = 8;
    const CYCLES: usize = 1000;
    const CAP: u32 = 4;

    let (manager, factory) = manager_with(
        PoolConfig::new()
            .max_connections(CAP)
            .acquire_timeout(Duration::from_secs(30)),
    )
    .await;
    manager.register_host(HostDescriptor::new("h1", "db.test")).unwrap();

    let tasks: Vec<_> = (0..TASKS)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move {
                for _ in 0..CYCLES {
                    let mut conn = manager.acquire("h1").await.unwrap();
                    conn.execute("SELECT 1").await.unwrap();
                    conn.release().await;
                }
            })
        })
        .collect();
    for result in join_all(tasks).await {
        result.unwrap();
    }

    assert!(
        factory.max_concurrent_executions() <= u64::from(CAP),
        "observed {} simultaneous executions with cap {CAP}",
        factory.max_concurrent_executions()
    );
    assert!(!factory.double_use_detected(), "a session was handed to two tasks at once");
    assert!(factory.connections_established() <= u64::from(CAP));

    let status = manager.status("h1").unwrap();
    assert_eq!(status.in_use, 0);
    assert!(status.total <= CAP);
    manager.shutdown_all().await;
}

/// One step of the randomized schedule.
#[derive(Debug, Clone, Copy)]
enum Op {
    Acquire,
    Release,
    DropGuard,
    Evict,
    KillLive,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Acquire),
        2 => Just(Op::Release),
        1 => Just(Op::DropGuard),
        1 => Just(Op::Evict),
        1 => Just(Op::KillLive),
    ]
}

fn assert_invariant(manager: &PoolManager, cap: u32) {
    let status = manager.status("h1").unwrap();
    assert!(
        status.in_use + status.available <= cap,
        "invariant violated: in_use={} available={} cap={cap}",
        status.in_use,
        status.available
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_occupancy_never_exceeds_cap(ops in proptest::collection::vec(op_strategy(), 1..48)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async move {
            tokio::time::pause();
            const CAP: u32 = 2;
            let (manager, factory) = manager_with(
                PoolConfig::new()
                    .max_connections(CAP)
                    .acquire_timeout(Duration::from_millis(10)),
            )
            .await;
            manager.register_host(HostDescriptor::new("h1", "db.test")).unwrap();

            let mut held: Vec<PooledSession> = Vec::new();
            for op in ops {
                match op {
                    Op::Acquire => {
                        // Saturated acquires time out; that is fine, the
                        // invariant must hold either way.
                        if let Ok(conn) = manager.acquire("h1").await {
                            held.push(conn);
                        }
                    }
                    Op::Release => {
                        if !held.is_empty() {
                            held.remove(0).release().await;
                        }
                    }
                    Op::DropGuard => {
                        if !held.is_empty() {
                            drop(held.remove(0));
                        }
                    }
                    Op::Evict => {
                        tokio::time::advance(Duration::from_millis(1)).await;
                        manager.evict_idle("h1", Duration::ZERO).await.unwrap();
                    }
                    Op::KillLive => factory.kill_all(),
                }
                assert_invariant(&manager, CAP);
            }

            for conn in held {
                conn.release().await;
            }
            assert_invariant(&manager, CAP);
            manager.shutdown_all().await;
        });
    }
}
