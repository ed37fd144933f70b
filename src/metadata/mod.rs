//! Declarative entity metadata and its resolution into SQL-ready form.
//!
//! An entity type describes itself through [`Entity::declaration`], usually
//! generated by `#[derive(Entity)]`. The declaration is raw: it may be
//! missing a table name or a primary key. [`MetadataResolver`] validates it
//! and produces an [`EntityMetadata`] the rest of the crate relies on.

mod resolver;

pub use resolver::{ColumnMapping, EntityMetadata, MetadataResolver};

use crate::core::{DataType, Result, Value};

/// A plain mutable record that can be loaded and flushed by a
/// `PersistenceContext`.
///
/// `Default` is the no-argument construction path; `get_field`/`set_field`
/// give generic access to every mapped field by its Rust field name.
pub trait Entity: Default + Send + Sync + 'static {
    /// Raw metadata as declared on the type.
    fn declaration() -> EntityDeclaration;

    /// Reads a mapped field as a column value.
    fn get_field(&self, field: &str) -> Result<Value>;

    /// Assigns a column value to a mapped field.
    fn set_field(&mut self, field: &str, value: Value) -> Result<()>;
}

/// Metadata exactly as an entity type declares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDeclaration {
    pub type_name: &'static str,
    pub table: Option<&'static str>,
    pub fields: Vec<FieldDeclaration>,
}

impl EntityDeclaration {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            table: None,
            fields: Vec::new(),
        }
    }

    pub fn table(mut self, table: &'static str) -> Self {
        self.table = Some(table);
        self
    }

    pub fn field(mut self, field: FieldDeclaration) -> Self {
        self.fields.push(field);
        self
    }
}

/// One struct field. Fields without a column are not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDeclaration {
    pub field: &'static str,
    pub column: Option<&'static str>,
    pub primary_key: bool,
    pub data_type: DataType,
}

impl FieldDeclaration {
    /// A field mapped to `column`.
    pub fn column(field: &'static str, column: &'static str, data_type: DataType) -> Self {
        Self {
            field,
            column: Some(column),
            primary_key: false,
            data_type,
        }
    }

    /// A field that exists on the type but has no column.
    pub fn unmapped(field: &'static str, data_type: DataType) -> Self {
        Self {
            field,
            column: None,
            primary_key: false,
            data_type,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}
