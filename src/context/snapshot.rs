use std::collections::HashMap;
use std::sync::Mutex;

use super::entity::column_values;
use super::EntityKey;
use crate::core::{Result, Value};
use crate::metadata::{Entity, EntityMetadata};

/// Column values of an entity as loaded, in column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot(Vec<Value>);

impl Snapshot {
    pub fn capture<T: Entity>(entity: &T, metadata: &EntityMetadata) -> Result<Self> {
        Ok(Self(column_values(entity, metadata)?))
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Whether `current` differs from the captured values in any column.
    /// A NULL turning into a value, or back, counts as a change.
    pub fn differs(&self, current: &[Value]) -> bool {
        self.0.as_slice() != current
    }

    /// Names of the columns whose value changed.
    pub fn changed_columns(&self, current: &[Value], metadata: &EntityMetadata) -> Vec<&'static str> {
        metadata
            .columns()
            .iter()
            .enumerate()
            .filter(|(index, _)| self.0.get(*index) != current.get(*index))
            .map(|(_, mapping)| mapping.column)
            .collect()
    }
}

/// Snapshots of every entity a context has loaded.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    snapshots: Mutex<HashMap<EntityKey, Snapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: EntityKey, snapshot: Snapshot) -> Result<()> {
        self.snapshots.lock()?.insert(key, snapshot);
        Ok(())
    }

    pub fn get(&self, key: &EntityKey) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.lock()?.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> Result<()> {
        self.snapshots.lock()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, OrmError};
    use crate::metadata::{EntityDeclaration, FieldDeclaration};

    #[derive(Default)]
    struct Tag {
        id: i64,
        label: Option<String>,
    }

    impl Entity for Tag {
        fn declaration() -> EntityDeclaration {
            EntityDeclaration::new("Tag")
                .table("tags")
                .field(FieldDeclaration::column("id", "id", DataType::Integer).primary_key())
                .field(FieldDeclaration::column("label", "label", DataType::Text))
        }

        fn get_field(&self, field: &str) -> Result<Value> {
            match field {
                "id" => Ok(Value::from(self.id)),
                "label" => Ok(Value::from(self.label.clone())),
                other => Err(OrmError::instantiation("Tag", format!("no field {}", other))),
            }
        }

        fn set_field(&mut self, field: &str, value: Value) -> Result<()> {
            match (field, value) {
                ("id", Value::Integer(id)) => self.id = id,
                ("label", Value::Text(label)) => self.label = Some(label),
                ("label", Value::Null) => self.label = None,
                (other, _) => return Err(OrmError::instantiation("Tag", format!("bad field {}", other))),
            }
            Ok(())
        }
    }

    fn metadata() -> EntityMetadata {
        EntityMetadata::resolve(&Tag::declaration()).unwrap()
    }

    #[test]
    fn test_unchanged_entity_is_clean() {
        let tag = Tag { id: 1, label: Some("rust".into()) };
        let snapshot = Snapshot::capture(&tag, &metadata()).unwrap();
        let current = column_values(&tag, &metadata()).unwrap();

        assert!(!snapshot.differs(&current));
        assert!(snapshot.changed_columns(&current, &metadata()).is_empty());
    }

    #[test]
    fn test_null_to_value_is_a_change() {
        let mut tag = Tag { id: 1, label: None };
        let snapshot = Snapshot::capture(&tag, &metadata()).unwrap();

        tag.label = Some("rust".into());
        let current = column_values(&tag, &metadata()).unwrap();
        assert!(snapshot.differs(&current));
        assert_eq!(snapshot.changed_columns(&current, &metadata()), vec!["label"]);

        let snapshot = Snapshot::capture(&tag, &metadata()).unwrap();
        tag.label = None;
        assert!(snapshot.differs(&column_values(&tag, &metadata()).unwrap()));
    }

    #[test]
    fn test_store_insert_get_clear() {
        let store = SnapshotStore::new();
        let key = EntityKey::of::<Tag>("Tag", Value::Integer(1));
        let tag = Tag { id: 1, label: None };

        store.insert(key.clone(), Snapshot::capture(&tag, &metadata()).unwrap()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key).unwrap().unwrap().values(), &[Value::Integer(1), Value::Null]);

        store.clear().unwrap();
        assert!(store.is_empty());
        assert!(store.get(&key).unwrap().is_none());
    }
}
