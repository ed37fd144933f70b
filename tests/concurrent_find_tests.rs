/// Concurrent find tests
///
/// Many tasks sharing one persistence context.
/// Run with: cargo test --test concurrent_find_tests

mod common;

use async_trait::async_trait;
use common::{Person, seeded_database};
use entitymap::{
    ConnectionConfig, ConnectionPool, ConnectionProvider, EntityRef, MemoryConnection,
    MemoryDatabase, OrmError, PersistenceContext, SessionState,
};
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Barrier;

/// Holds every acquire long enough for concurrent finds to overlap.
struct SlowProvider {
    db: MemoryDatabase,
    delay: Duration,
    acquired: AtomicUsize,
}

impl SlowProvider {
    fn new(db: MemoryDatabase, delay: Duration) -> Self {
        Self {
            db,
            delay,
            acquired: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ConnectionProvider for SlowProvider {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> entitymap::Result<MemoryConnection> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.db.acquire().await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_find_same_key_loads_once() {
    let db = seeded_database().await;
    let ctx = Arc::new(PersistenceContext::new(db.clone()));

    let num_tasks = 16;
    let barrier = Arc::new(Barrier::new(num_tasks));
    let mut handles = vec![];

    for _ in 0..num_tasks {
        let ctx = Arc::clone(&ctx);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            ctx.find::<Person>(1).await.unwrap()
        }));
    }

    let mut found = Vec::with_capacity(num_tasks);
    for handle in handles {
        found.push(handle.await.unwrap());
    }

    assert_eq!(db.count_statements("SELECT"), 1);
    assert!(found.iter().all(|p| EntityRef::ptr_eq(p, &found[0])));
    assert_eq!(ctx.cached_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_finds_share_one_slow_load() {
    let db = seeded_database().await;
    let provider = SlowProvider::new(db.clone(), Duration::from_millis(100));
    let ctx = Arc::new(PersistenceContext::new(provider));

    let num_tasks = 8;
    let barrier = Arc::new(Barrier::new(num_tasks));
    let handles: Vec<_> = (0..num_tasks)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                ctx.find::<Person>(2).await.unwrap()
            })
        })
        .collect();

    let mut found = Vec::with_capacity(num_tasks);
    for handle in handles {
        found.push(handle.await.unwrap());
    }

    // Every task arrived while the first load was still sleeping in acquire
    assert_eq!(ctx.provider().acquired.load(Ordering::SeqCst), 1);
    assert_eq!(db.count_statements("SELECT"), 1);
    assert!(found.iter().all(|p| EntityRef::ptr_eq(p, &found[0])));
}

#[tokio::test]
async fn test_concurrent_find_distinct_keys() {
    let db = seeded_database().await;
    let ctx = PersistenceContext::new(db.clone());

    let lookups = (0..12).map(|i| ctx.find::<Person>(i % 3 + 1));
    let results = join_all(lookups).await;

    let people: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(db.count_statements("SELECT"), 3);
    assert!(EntityRef::ptr_eq(&people[0], &people[3]));
    assert!(!EntityRef::ptr_eq(&people[0], &people[1]));
    assert_eq!(ctx.cached_count(), 3);
}

#[tokio::test]
async fn test_concurrent_failed_loads_leave_nothing_cached() {
    let db = seeded_database().await;
    let ctx = PersistenceContext::new(db.clone());

    let results = join_all((0..5).map(|_| ctx.find::<Person>(42))).await;
    assert!(results.iter().all(|r| r.as_ref().is_err_and(OrmError::is_not_found)));
    assert!(!ctx.contains::<Person>(42));
    assert_eq!(ctx.cached_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_waits_for_in_flight_finds() {
    let db = seeded_database().await;
    let ctx = Arc::new(PersistenceContext::new(db.clone()));

    let finders: Vec<_> = (1..=3)
        .map(|id| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.find::<Person>(id).await })
        })
        .collect();

    let closer = {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move { ctx.close().await })
    };

    closer.await.unwrap().unwrap();
    for finder in finders {
        // Each find either completed before close or was refused after it
        match finder.await.unwrap() {
            Ok(_) => {}
            Err(err) => assert!(matches!(err, OrmError::IllegalState(_))),
        }
    }

    assert_eq!(ctx.state().await, SessionState::Closed);
    assert_eq!(ctx.cached_count(), 0);
}

#[tokio::test]
async fn test_exhausted_pool_surfaces_connection_error() {
    let db = seeded_database().await;
    let config = ConnectionConfig::default()
        .max_connections(1)
        .connect_timeout(Duration::from_millis(50));
    let pool = Arc::new(ConnectionPool::with_database(config, db).unwrap());
    let ctx = PersistenceContext::new(Arc::clone(&pool));

    let held = pool.get_connection().await.unwrap();
    let err = ctx.find::<Person>(1).await.unwrap_err();
    assert!(matches!(err, OrmError::Connection(_)));
    assert!(!ctx.contains::<Person>(1));

    drop(held);
    let ada = ctx.find::<Person>(1).await.unwrap();
    assert_eq!(ada.read().await.first_name, "Ada");
}

#[tokio::test]
async fn test_connections_released_on_every_path() {
    let db = seeded_database().await;
    let config = ConnectionConfig::default()
        .max_connections(1)
        .connect_timeout(Duration::from_millis(200));
    let pool = Arc::new(ConnectionPool::with_database(config, db.clone()).unwrap());
    let ctx = PersistenceContext::new(Arc::clone(&pool));

    // Not found, then found, then a failing flush: each must hand the
    // single connection back.
    assert!(ctx.find::<Person>(99).await.unwrap_err().is_not_found());
    let ada = ctx.find::<Person>(1).await.unwrap();
    ada.write().await.last_name = "Byron".into();
    db.batch("DROP TABLE persons").await.unwrap();
    assert!(matches!(ctx.close().await, Err(OrmError::Flush(_))));

    let stats = pool.stats();
    assert_eq!(stats.active_connections, 0);
    assert_eq!(stats.total_connections, 1);
}
