use std::fmt;

use thiserror::Error;

use super::Value;

#[derive(Error, Debug)]
pub enum OrmError {
    #[error("Configuration error for entity '{entity}': {message}")]
    Configuration {
        entity: &'static str,
        message: String,
    },

    #[error("Entity '{entity}' not found by primary key {key}")]
    NotFound { entity: &'static str, key: Value },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query execution error: {0}")]
    QueryExecution(String),

    #[error("Failed to instantiate entity '{entity}': {message}")]
    Instantiation {
        entity: &'static str,
        message: String,
    },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Update of '{entity}' with key {key} affected {affected} rows, expected exactly 1")]
    UnexpectedUpdateCount {
        entity: &'static str,
        key: Value,
        affected: u64,
    },

    #[error("{0}")]
    Flush(FlushErrors),
}

impl OrmError {
    pub(crate) fn configuration(entity: &'static str, message: impl Into<String>) -> Self {
        Self::Configuration {
            entity,
            message: message.into(),
        }
    }

    pub(crate) fn instantiation(entity: &'static str, message: impl Into<String>) -> Self {
        Self::Instantiation {
            entity,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

pub type Result<T> = std::result::Result<T, OrmError>;

impl<T> From<std::sync::PoisonError<T>> for OrmError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

/// One entity that could not be written back while a context was closing.
#[derive(Debug)]
pub struct FlushFailure {
    /// Display form of the entity key, e.g. `Person#1`.
    pub entity_key: String,
    pub error: OrmError,
}

/// Every flush failure collected during a single `close()`.
#[derive(Debug, Default)]
pub struct FlushErrors {
    pub attempted: usize,
    pub failures: Vec<FlushFailure>,
}

impl FlushErrors {
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlushFailure> {
        self.failures.iter()
    }
}

impl fmt::Display for FlushErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} dirty entities failed to flush",
            self.failures.len(),
            self.attempted
        )?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.entity_key, failure.error)?;
        }
        Ok(())
    }
}
