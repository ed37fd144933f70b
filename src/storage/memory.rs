use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::executor::{self, Executor};
use super::Catalog;
use crate::connection::{Connection, ConnectionProvider};
use crate::core::{OrmError, Result};
use crate::result::QueryResult;
use crate::sql::Statement;

struct Inner {
    catalog: RwLock<Catalog>,
    /// Every statement handed to the database, in arrival order.
    log: Mutex<Vec<Statement>>,
    next_connection: AtomicU64,
}

/// A shared in-memory SQL database.
///
/// Cloning yields another handle to the same data. Reads run concurrently,
/// writes are serialized.
#[derive(Clone)]
pub struct MemoryDatabase {
    inner: Arc<Inner>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                catalog: RwLock::new(Catalog::new()),
                log: Mutex::new(Vec::new()),
                next_connection: AtomicU64::new(1),
            }),
        }
    }

    /// Opens a new connection handle.
    pub fn connect(&self) -> MemoryConnection {
        let id = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        MemoryConnection {
            id,
            db: self.clone(),
        }
    }

    /// Runs a single row-returning statement.
    pub async fn query(&self, statement: &Statement) -> Result<QueryResult> {
        let parsed = self.prepare(statement)?;
        let catalog = self.inner.catalog.read().await;
        let result = Executor::new(statement.params()).query(&catalog, parsed)?;
        debug!(sql = statement.sql(), rows = result.row_count(), "query executed");
        Ok(result)
    }

    /// Runs a single modifying statement and returns the affected-row count.
    pub async fn execute(&self, statement: &Statement) -> Result<u64> {
        let parsed = self.prepare(statement)?;
        let mut catalog = self.inner.catalog.write().await;
        let affected = Executor::new(statement.params()).execute(&mut catalog, parsed)?;
        debug!(sql = statement.sql(), affected, "statement executed");
        Ok(affected)
    }

    /// Runs a script of parameterless statements, typically schema setup
    /// and seed data. Stops at the first failing statement.
    pub async fn batch(&self, sql: &str) -> Result<()> {
        let statements = executor::parse(sql)?;
        let mut catalog = self.inner.catalog.write().await;
        let executor = Executor::new(&[]);
        for parsed in statements {
            if executor::is_query(&parsed) {
                executor.query(&catalog, parsed)?;
            } else {
                executor.execute(&mut catalog, parsed)?;
            }
        }
        Ok(())
    }

    /// Statements run through `query` and `execute` so far.
    pub fn statement_log(&self) -> Vec<Statement> {
        self.inner
            .log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Number of logged statements whose text starts with `prefix`,
    /// ignoring case.
    pub fn count_statements(&self, prefix: &str) -> usize {
        self.statement_log()
            .iter()
            .filter(|statement| {
                statement
                    .sql()
                    .trim_start()
                    .get(..prefix.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
            })
            .count()
    }

    pub fn clear_statement_log(&self) {
        if let Ok(mut log) = self.inner.log.lock() {
            log.clear();
        }
    }

    pub async fn table_exists(&self, name: &str) -> bool {
        self.inner.catalog.read().await.table_exists(name)
    }

    pub async fn table_row_count(&self, name: &str) -> Result<usize> {
        Ok(self.inner.catalog.read().await.get_table(name)?.row_count())
    }

    fn prepare(&self, statement: &Statement) -> Result<sqlparser::ast::Statement> {
        self.inner.log.lock()?.push(statement.clone());

        let mut parsed = executor::parse(statement.sql())?;
        if parsed.len() != 1 {
            return Err(OrmError::QueryExecution(format!(
                "expected exactly one statement, got {}",
                parsed.len()
            )));
        }
        Ok(parsed.remove(0))
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDatabase")
            .field("handles", &Arc::strong_count(&self.inner))
            .finish()
    }
}

#[async_trait]
impl ConnectionProvider for MemoryDatabase {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> Result<MemoryConnection> {
        Ok(self.connect())
    }
}

/// A connection to a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
    db: MemoryDatabase,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn query(&mut self, statement: &Statement) -> Result<QueryResult> {
        self.db.query(statement).await
    }

    async fn execute(&mut self, statement: &Statement) -> Result<u64> {
        self.db.execute(statement).await
    }
}
