use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::trace;

use super::{Entity, EntityDeclaration};
use crate::core::{DataType, OrmError, Result};

/// A mapped column and the field that backs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub column: &'static str,
    pub field: &'static str,
    pub data_type: DataType,
}

/// Validated metadata of one entity type.
///
/// `columns` order is the declaration order; snapshots, comparisons and
/// UPDATE parameter lists all use it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMetadata {
    entity_name: &'static str,
    table: &'static str,
    columns: Vec<ColumnMapping>,
    primary_key: usize,
}

impl EntityMetadata {
    /// Validates a declaration.
    pub fn resolve(declaration: &EntityDeclaration) -> Result<Self> {
        let entity = declaration.type_name;

        let table = match declaration.table {
            Some(table) if !table.trim().is_empty() => table,
            _ => return Err(OrmError::configuration(entity, "no table name declared")),
        };
        if !is_valid_identifier(table, true) {
            return Err(OrmError::configuration(
                entity,
                format!("table name '{}' is not a valid SQL identifier", table),
            ));
        }

        let mut columns = Vec::new();
        let mut primary_keys = Vec::new();
        let mut seen = HashSet::new();

        for field in &declaration.fields {
            let Some(column) = field.column else {
                continue;
            };

            if !is_valid_identifier(column, false) {
                return Err(OrmError::configuration(
                    entity,
                    format!("column name '{}' is not a valid SQL identifier", column),
                ));
            }
            if !seen.insert(column.to_ascii_lowercase()) {
                return Err(OrmError::configuration(
                    entity,
                    format!("column '{}' is mapped more than once", column),
                ));
            }

            if field.primary_key {
                primary_keys.push(columns.len());
            }
            columns.push(ColumnMapping {
                column,
                field: field.field,
                data_type: field.data_type,
            });
        }

        if columns.is_empty() {
            return Err(OrmError::configuration(entity, "no mapped columns declared"));
        }

        let primary_key = match primary_keys.as_slice() {
            [index] => *index,
            [] => {
                return Err(OrmError::configuration(
                    entity,
                    "primary key column is not specified",
                ));
            }
            many => {
                return Err(OrmError::configuration(
                    entity,
                    format!("expected exactly one primary key column, found {}", many.len()),
                ));
            }
        };

        Ok(Self {
            entity_name: entity,
            table,
            columns,
            primary_key,
        })
    }

    pub fn entity_name(&self) -> &'static str {
        self.entity_name
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn columns(&self) -> &[ColumnMapping] {
        &self.columns
    }

    pub fn primary_key(&self) -> &ColumnMapping {
        &self.columns[self.primary_key]
    }

    pub fn primary_key_index(&self) -> usize {
        self.primary_key
    }

    /// Mapped columns other than the primary key, in column order.
    pub fn non_key_columns(&self) -> impl Iterator<Item = &ColumnMapping> {
        self.columns
            .iter()
            .enumerate()
            .filter(move |(index, _)| *index != self.primary_key)
            .map(|(_, mapping)| mapping)
    }

    pub fn has_uuid_primary_key(&self) -> bool {
        self.primary_key().data_type == DataType::Uuid
    }
}

/// Letters, digits and underscores, not starting with a digit. Tables may be
/// schema-qualified.
fn is_valid_identifier(name: &str, allow_qualified: bool) -> bool {
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() || first == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    };

    if allow_qualified {
        let parts: Vec<&str> = name.split('.').collect();
        parts.len() <= 2 && parts.into_iter().all(valid_part)
    } else {
        valid_part(name)
    }
}

/// Resolves entity metadata once per type and hands out shared copies.
#[derive(Debug, Default)]
pub struct MetadataResolver {
    resolved: RwLock<HashMap<TypeId, Arc<EntityMetadata>>>,
}

impl MetadataResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Failed resolutions are not cached; every call reports the error again.
    pub fn resolve<T: Entity>(&self) -> Result<Arc<EntityMetadata>> {
        let type_id = TypeId::of::<T>();
        if let Some(metadata) = self.resolved.read()?.get(&type_id) {
            return Ok(Arc::clone(metadata));
        }

        let metadata = Arc::new(EntityMetadata::resolve(&T::declaration())?);
        trace!(
            entity = metadata.entity_name(),
            table = metadata.table(),
            columns = metadata.columns().len(),
            "resolved entity metadata"
        );

        let mut resolved = self.resolved.write()?;
        let entry = resolved.entry(type_id).or_insert(metadata);
        Ok(Arc::clone(entry))
    }

    pub fn len(&self) -> usize {
        self.resolved.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FieldDeclaration;

    fn person() -> EntityDeclaration {
        EntityDeclaration::new("Person")
            .table("persons")
            .field(FieldDeclaration::column("id", "id", DataType::Integer).primary_key())
            .field(FieldDeclaration::column("first_name", "first_name", DataType::Text))
            .field(FieldDeclaration::column("last_name", "last_name", DataType::Text))
    }

    #[test]
    fn test_resolve_keeps_declaration_order() {
        let metadata = EntityMetadata::resolve(&person()).unwrap();

        assert_eq!(metadata.table(), "persons");
        let columns: Vec<_> = metadata.columns().iter().map(|c| c.column).collect();
        assert_eq!(columns, vec!["id", "first_name", "last_name"]);
        assert_eq!(metadata.primary_key().column, "id");
        let non_key: Vec<_> = metadata.non_key_columns().map(|c| c.column).collect();
        assert_eq!(non_key, vec!["first_name", "last_name"]);
        assert!(!metadata.has_uuid_primary_key());
    }

    #[test]
    fn test_missing_table_is_configuration_error() {
        let mut declaration = person();
        declaration.table = None;
        let err = EntityMetadata::resolve(&declaration).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_missing_primary_key_is_configuration_error() {
        let declaration = EntityDeclaration::new("Tag")
            .table("tags")
            .field(FieldDeclaration::column("name", "name", DataType::Text));
        let err = EntityMetadata::resolve(&declaration).unwrap_err();
        assert!(err.to_string().contains("primary key"));
    }

    #[test]
    fn test_unmapped_primary_key_does_not_count() {
        let declaration = EntityDeclaration::new("Tag")
            .table("tags")
            .field(FieldDeclaration::unmapped("id", DataType::Integer).primary_key())
            .field(FieldDeclaration::column("name", "name", DataType::Text));
        assert!(EntityMetadata::resolve(&declaration).unwrap_err().is_configuration());
    }

    #[test]
    fn test_two_primary_keys_are_rejected() {
        let declaration = person()
            .field(FieldDeclaration::column("code", "code", DataType::Text).primary_key());
        assert!(EntityMetadata::resolve(&declaration).unwrap_err().is_configuration());
    }

    #[test]
    fn test_no_columns_is_rejected() {
        let declaration = EntityDeclaration::new("Empty").table("empty");
        assert!(EntityMetadata::resolve(&declaration).unwrap_err().is_configuration());
    }

    #[test]
    fn test_duplicate_column_is_ambiguous() {
        let declaration = person()
            .field(FieldDeclaration::column("surname", "LAST_NAME", DataType::Text));
        assert!(EntityMetadata::resolve(&declaration).unwrap_err().is_configuration());
    }

    #[test]
    fn test_identifiers_cannot_smuggle_sql() {
        let declaration = EntityDeclaration::new("Evil")
            .table("persons; DROP TABLE persons")
            .field(FieldDeclaration::column("id", "id", DataType::Integer).primary_key());
        assert!(EntityMetadata::resolve(&declaration).unwrap_err().is_configuration());

        let declaration = EntityDeclaration::new("Evil")
            .table("public.persons")
            .field(FieldDeclaration::column("id", "id = 1 OR 1", DataType::Integer).primary_key());
        assert!(EntityMetadata::resolve(&declaration).unwrap_err().is_configuration());
    }

    #[test]
    fn test_schema_qualified_table_is_allowed() {
        let mut declaration = person();
        declaration.table = Some("public.persons");
        assert_eq!(EntityMetadata::resolve(&declaration).unwrap().table(), "public.persons");
    }
}
