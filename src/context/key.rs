use std::any::TypeId;
use std::fmt;

use crate::core::Value;
use crate::metadata::Entity;

/// Identity of one row within a session: entity type plus primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    entity_type: TypeId,
    entity_name: &'static str,
    id: Value,
}

impl EntityKey {
    pub fn of<T: Entity>(entity_name: &'static str, id: Value) -> Self {
        Self {
            entity_type: TypeId::of::<T>(),
            entity_name,
            id,
        }
    }

    pub fn entity_type(&self) -> TypeId {
        self.entity_type
    }

    pub fn entity_name(&self) -> &'static str {
        self.entity_name
    }

    pub fn id(&self) -> &Value {
        &self.id
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_name, self.id)
    }
}
