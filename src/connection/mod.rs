pub mod config;
pub mod pool;

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::Result;
use crate::result::QueryResult;
use crate::sql::{PlaceholderStyle, Statement};

/// A single acquired database connection.
///
/// The connection is released when the value is dropped, so a connection
/// scoped to one statement is returned on every exit path.
#[async_trait]
pub trait Connection: Send {
    /// Executes a statement that returns rows (SELECT).
    async fn query(&mut self, statement: &Statement) -> Result<QueryResult>;

    /// Executes a statement that modifies data and returns the affected-row count.
    async fn execute(&mut self, statement: &Statement) -> Result<u64>;
}

/// Source of connections for a persistence context.
///
/// Implement this to plug a real driver in; [`pool::ConnectionPool`] serves
/// the in-memory database.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    type Connection: Connection + 'static;

    /// Acquires a connection; fails with `OrmError::Connection`.
    async fn acquire(&self) -> Result<Self::Connection>;

    /// Placeholder spelling the underlying driver understands.
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Question
    }
}

#[async_trait]
impl<P: ConnectionProvider> ConnectionProvider for Arc<P> {
    type Connection = P::Connection;

    async fn acquire(&self) -> Result<Self::Connection> {
        (**self).acquire().await
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        (**self).placeholder_style()
    }
}
