use serde::{Deserialize, Serialize};

use super::Statement;
use crate::core::Value;
use crate::metadata::EntityMetadata;

/// How positional parameters are spelled in statement text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaceholderStyle {
    /// `?` for every parameter.
    #[default]
    Question,
    /// `$1`, `$2`, ... as Postgres expects.
    Numbered,
}

impl PlaceholderStyle {
    /// Placeholder for the parameter at 1-based `position`.
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            Self::Question => "?".to_string(),
            Self::Numbered => format!("${}", position),
        }
    }
}

/// Synthesizes SELECT-by-key and UPDATE-by-key statements from resolved
/// metadata. Only identifiers taken from validated metadata reach the text.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlBuilder {
    style: PlaceholderStyle,
}

impl SqlBuilder {
    pub fn new(style: PlaceholderStyle) -> Self {
        Self { style }
    }

    /// `SELECT * FROM <table> WHERE <pk> = <key placeholder>`
    pub fn select_by_key(&self, metadata: &EntityMetadata) -> String {
        format!(
            "SELECT * FROM {} WHERE {} = {}",
            metadata.table(),
            metadata.primary_key().column,
            self.key_placeholder(metadata, 1)
        )
    }

    /// `UPDATE <table> SET <col> = <p>, ... WHERE <pk> = <key placeholder>`
    /// over every non-key column in column order. `None` when the entity
    /// maps no column besides its key.
    pub fn update_by_key(&self, metadata: &EntityMetadata) -> Option<String> {
        let mut position = 0;
        let assignments = metadata
            .non_key_columns()
            .map(|mapping| {
                position += 1;
                format!("{} = {}", mapping.column, self.style.placeholder(position))
            })
            .collect::<Vec<_>>();
        if assignments.is_empty() {
            return None;
        }

        Some(format!(
            "UPDATE {} SET {} WHERE {} = {}",
            metadata.table(),
            assignments.join(", "),
            metadata.primary_key().column,
            self.key_placeholder(metadata, position + 1)
        ))
    }

    /// SELECT statement with the key bound.
    pub fn select_statement(&self, metadata: &EntityMetadata, key: Value) -> Statement {
        Statement::prepare(self.select_by_key(metadata)).bind(key)
    }

    /// UPDATE statement for an entity whose column values are `values`
    /// (all mapped columns, in column order). Non-key values are bound
    /// first, the key value last.
    pub fn update_statement(
        &self,
        metadata: &EntityMetadata,
        values: &[Value],
        key: Value,
    ) -> Option<Statement> {
        let sql = self.update_by_key(metadata)?;
        let pk = metadata.primary_key_index();
        let non_key = values
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != pk)
            .map(|(_, value)| value.clone());

        Some(Statement::prepare(sql).bind_all(non_key).bind(key))
    }

    fn key_placeholder(&self, metadata: &EntityMetadata, position: usize) -> String {
        let placeholder = self.style.placeholder(position);
        if metadata.has_uuid_primary_key() {
            format!("uuid({})", placeholder)
        } else {
            placeholder
        }
    }
}
