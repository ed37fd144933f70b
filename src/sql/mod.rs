//! Parameterized statement synthesis.

mod builder;
mod statement;

pub use builder::{PlaceholderStyle, SqlBuilder};
pub use statement::Statement;
