use super::{Connection, ConnectionProvider, config::ConnectionConfig};
use crate::core::{OrmError, Result};
use crate::result::QueryResult;
use crate::sql::Statement;
use crate::storage::{MemoryConnection, MemoryDatabase};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Connection pool
///
/// Bounds the number of simultaneously acquired connections to a
/// [`MemoryDatabase`]. A caller that finds the pool exhausted waits up to
/// `connect_timeout` for a connection to be released.
pub struct ConnectionPool {
    /// Pool configuration
    config: ConnectionConfig,
    /// Released connections ready for reuse
    available: Arc<Mutex<VecDeque<MemoryConnection>>>,
    /// Connections created and not yet discarded
    total_connections: Arc<AtomicUsize>,
    /// Shared database instance
    db: MemoryDatabase,
}

impl ConnectionPool {
    /// Create a pool serving a fresh, empty database
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        Self::with_database(config, MemoryDatabase::new())
    }

    /// Create a pool serving an existing database
    pub fn with_database(config: ConnectionConfig, db: MemoryDatabase) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            available: Arc::new(Mutex::new(VecDeque::new())),
            total_connections: Arc::new(AtomicUsize::new(0)),
            db,
        })
    }

    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Get a connection from the pool
    pub async fn get_connection(&self) -> Result<PoolGuard> {
        let start = Instant::now();

        loop {
            // Reuse a released connection first
            if let Some(connection) = self.try_get_available()? {
                return Ok(self.guard(connection));
            }

            // Otherwise open a new one if under the limit
            if let Some(connection) = self.try_create_connection() {
                return Ok(self.guard(connection));
            }

            if start.elapsed() >= self.config.connect_timeout {
                warn!(
                    max_connections = self.config.max_connections,
                    "connection pool exhausted"
                );
                return Err(OrmError::Connection(format!(
                    "Connection pool timeout: no connection available within {:?}",
                    self.config.connect_timeout
                )));
            }

            // Wait a bit before retrying
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn guard(&self, connection: MemoryConnection) -> PoolGuard {
        PoolGuard {
            connection: Some(connection),
            pool: Arc::clone(&self.available),
            total_connections: Arc::clone(&self.total_connections),
        }
    }

    fn try_get_available(&self) -> Result<Option<MemoryConnection>> {
        Ok(self.available.lock()?.pop_front())
    }

    fn try_create_connection(&self) -> Option<MemoryConnection> {
        self.total_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |total| {
                (total < self.config.max_connections).then_some(total + 1)
            })
            .ok()?;

        let connection = self.db.connect();
        debug!(connection_id = connection.id(), "opened pooled connection");
        Some(connection)
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let available = self.available.lock().map(|queue| queue.len()).unwrap_or(0);
        let total = self.total_connections.load(Ordering::SeqCst);

        PoolStats {
            total_connections: total,
            available_connections: available,
            active_connections: total.saturating_sub(available),
            max_connections: self.config.max_connections,
        }
    }
}

#[async_trait]
impl ConnectionProvider for ConnectionPool {
    type Connection = PoolGuard;

    async fn acquire(&self) -> Result<PoolGuard> {
        self.get_connection().await
    }
}

/// Connection pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub total_connections: usize,
    pub available_connections: usize,
    pub active_connections: usize,
    pub max_connections: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} active, {} available, max {}",
            self.active_connections,
            self.total_connections,
            self.available_connections,
            self.max_connections
        )
    }
}

/// RAII guard for pooled connections
///
/// Returns the connection to the pool when dropped
pub struct PoolGuard {
    connection: Option<MemoryConnection>,
    pool: Arc<Mutex<VecDeque<MemoryConnection>>>,
    total_connections: Arc<AtomicUsize>,
}

impl PoolGuard {
    fn connection(&mut self) -> Result<&mut MemoryConnection> {
        self.connection
            .as_mut()
            .ok_or_else(|| OrmError::Connection("Connection already returned to pool".into()))
    }
}

#[async_trait]
impl Connection for PoolGuard {
    async fn query(&mut self, statement: &Statement) -> Result<QueryResult> {
        self.connection()?.query(statement).await
    }

    async fn execute(&mut self, statement: &Statement) -> Result<u64> {
        self.connection()?.execute(statement).await
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            match self.pool.lock() {
                Ok(mut pool) => pool.push_back(connection),
                Err(_) => {
                    // A discarded connection frees its slot
                    self.total_connections.fetch_sub(1, Ordering::SeqCst);
                    warn!(
                        connection_id = connection.id(),
                        "pool lock poisoned, discarding connection"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_creation() {
        let pool = ConnectionPool::new(ConnectionConfig::default().max_connections(5)).unwrap();
        let stats = pool.stats();

        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.max_connections, 5);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = ConnectionPool::new(ConnectionConfig::default().max_connections(0));
        assert!(result.is_err_and(|e| e.is_configuration()));
    }

    #[tokio::test]
    async fn test_connection_return_to_pool() {
        let pool = ConnectionPool::new(ConnectionConfig::default().max_connections(5)).unwrap();

        {
            let _conn = pool.get_connection().await.unwrap();
            let stats = pool.stats();
            assert_eq!(stats.active_connections, 1);
            assert_eq!(stats.available_connections, 0);
        } // Connection returned here

        let stats = pool.stats();
        assert_eq!(stats.available_connections, 1);
        assert_eq!(stats.active_connections, 0);

        let _again = pool.get_connection().await.unwrap();
        assert_eq!(pool.stats().total_connections, 1);
    }

    #[tokio::test]
    async fn test_max_connections_limit() {
        let config = ConnectionConfig::default()
            .max_connections(2)
            .connect_timeout(Duration::from_millis(100));
        let pool = ConnectionPool::new(config).unwrap();

        let _conn1 = pool.get_connection().await.unwrap();
        let _conn2 = pool.get_connection().await.unwrap();

        // Third connection should timeout
        let result = pool.get_connection().await;
        assert!(matches!(result, Err(OrmError::Connection(_))));
    }

    #[tokio::test]
    async fn test_waiter_gets_released_connection() {
        let config = ConnectionConfig::default()
            .max_connections(1)
            .connect_timeout(Duration::from_secs(5));
        let pool = Arc::new(ConnectionPool::new(config).unwrap());

        let held = pool.get_connection().await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get_connection().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_guard_runs_statements() {
        let pool = ConnectionPool::new(ConnectionConfig::default()).unwrap();
        pool.database()
            .batch("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1), (2);")
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let result = conn.query(&Statement::prepare("SELECT * FROM t")).await.unwrap();
        assert_eq!(result.row_count(), 2);
    }

    #[tokio::test]
    async fn test_poisoned_pool_frees_discarded_slot() {
        let pool = ConnectionPool::new(ConnectionConfig::default().max_connections(2)).unwrap();
        let guard = pool.get_connection().await.unwrap();
        assert_eq!(pool.stats().total_connections, 1);

        let available = Arc::clone(&pool.available);
        let poisoner = std::thread::spawn(move || {
            let _queue = available.lock().unwrap();
            panic!("panic while holding the pool lock");
        });
        assert!(poisoner.join().is_err());

        drop(guard);
        let stats = pool.stats();
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
    }
}
