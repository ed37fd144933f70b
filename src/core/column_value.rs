use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{DataType, OrmError, Result, Value};

/// Conversion between a Rust field type and a column [`Value`].
///
/// Implemented for every type an entity field may have; the `Entity`
/// derive uses it to generate `get_field`/`set_field`.
pub trait ColumnValue: Sized {
    /// Declared column type, used among other things to detect UUID keys.
    fn data_type() -> DataType;

    fn to_value(&self) -> Value;

    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch(expected: DataType, got: &Value) -> OrmError {
    OrmError::TypeMismatch(format!("expected {}, got {}", expected, got.type_name()))
}

impl ColumnValue for i64 {
    fn data_type() -> DataType {
        DataType::Integer
    }

    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Integer(i) => Ok(i),
            other => Err(mismatch(DataType::Integer, &other)),
        }
    }
}

impl ColumnValue for i32 {
    fn data_type() -> DataType {
        DataType::Integer
    }

    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Integer(i) => i32::try_from(i).map_err(|_| {
                OrmError::TypeMismatch(format!("integer {} does not fit into i32", i))
            }),
            other => Err(mismatch(DataType::Integer, &other)),
        }
    }
}

impl ColumnValue for f64 {
    fn data_type() -> DataType {
        DataType::Float
    }

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Integer(i) => Ok(i as f64),
            other => Err(mismatch(DataType::Float, &other)),
        }
    }
}

impl ColumnValue for bool {
    fn data_type() -> DataType {
        DataType::Boolean
    }

    fn to_value(&self) -> Value {
        Value::Boolean(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Boolean(b) => Ok(b),
            other => Err(mismatch(DataType::Boolean, &other)),
        }
    }
}

impl ColumnValue for String {
    fn data_type() -> DataType {
        DataType::Text
    }

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(mismatch(DataType::Text, &other)),
        }
    }
}

impl ColumnValue for Uuid {
    fn data_type() -> DataType {
        DataType::Uuid
    }

    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Uuid(u) => Ok(u),
            Value::Text(s) => Uuid::parse_str(&s)
                .map_err(|err| OrmError::TypeMismatch(format!("invalid uuid '{}': {}", s, err))),
            other => Err(mismatch(DataType::Uuid, &other)),
        }
    }
}

impl ColumnValue for DateTime<Utc> {
    fn data_type() -> DataType {
        DataType::Timestamp
    }

    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Timestamp(t) => Ok(t),
            other => Err(mismatch(DataType::Timestamp, &other)),
        }
    }
}

impl<T: ColumnValue> ColumnValue for Option<T> {
    fn data_type() -> DataType {
        T::data_type()
    }

    fn to_value(&self) -> Value {
        match self {
            Some(value) => value.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
