// ============================================================================
// entitymap Library
// ============================================================================

//! A session-scoped persistence context.
//!
//! Entities are plain structs deriving [`Entity`]. A [`PersistenceContext`]
//! loads them by primary key, keeps one shared instance per key for the
//! lifetime of the session and, on [`close`](PersistenceContext::close),
//! writes back exactly those whose mapped columns changed.
//!
//! ```
//! use entitymap::{Entity, MemoryDatabase, PersistenceContext};
//!
//! #[derive(Debug, Default, Entity)]
//! #[entity(table = "persons")]
//! struct Person {
//!     #[id]
//!     id: i64,
//!     #[column]
//!     first_name: String,
//!     #[column]
//!     last_name: String,
//! }
//!
//! # tokio_test::block_on(async {
//! let db = MemoryDatabase::new();
//! db.batch(
//!     "CREATE TABLE persons (id BIGINT NOT NULL, first_name TEXT, last_name TEXT);
//!      INSERT INTO persons VALUES (1, 'Ada', 'Lovelace');",
//! )
//! .await?;
//!
//! let ctx = PersistenceContext::new(db.clone());
//! let ada = ctx.find::<Person>(1).await?;
//! ada.write().await.last_name = "Byron".to_string();
//! ctx.close().await?;
//!
//! assert_eq!(db.count_statements("UPDATE"), 1);
//! # Ok::<(), entitymap::OrmError>(())
//! # }).unwrap();
//! ```

// Lets the derive macro's `::entitymap::...` paths resolve inside this crate.
extern crate self as entitymap;

pub mod connection;
pub mod context;
pub mod core;
pub mod metadata;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod result;
pub mod sql;
pub mod storage;

// Re-export main types for convenience
pub use crate::core::{ColumnValue, DataType, FlushErrors, FlushFailure, OrmError, Result, Value};
pub use metadata::Entity;
pub use entitymap_derive::Entity;
pub use result::QueryResult;
pub use sql::{PlaceholderStyle, SqlBuilder, Statement};

// Re-export connection API
pub use connection::{
    Connection, ConnectionProvider,
    config::ConnectionConfig,
    pool::{ConnectionPool, PoolGuard, PoolStats},
};
pub use storage::{MemoryConnection, MemoryDatabase};

pub use context::{ContextConfig, EntityKey, EntityRef, FlushPolicy, PersistenceContext, SessionState};

#[cfg(feature = "postgres")]
pub use postgres::{PgConnection, PgConnectionProvider};
