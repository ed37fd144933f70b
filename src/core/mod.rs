pub mod column_value;
pub mod error;
pub mod types;
pub mod value;

pub use column_value::ColumnValue;
pub use error::{FlushErrors, FlushFailure, OrmError, Result};
pub use types::{Column, Row, Schema};
pub use value::{DataType, Value};
