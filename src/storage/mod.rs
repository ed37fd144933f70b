//! In-memory SQL backend.
//!
//! Small enough to understand the statements a persistence context emits,
//! strict enough to behave like a typed relational database in tests.

pub mod catalog;
mod executor;
pub mod memory;
pub mod table;

pub use catalog::Catalog;
pub use memory::{MemoryConnection, MemoryDatabase};
pub use table::Table;
