use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::{Result, Value};
use crate::metadata::{Entity, EntityMetadata};

/// Shared handle to an entity held by a persistence context.
///
/// Every `find` for the same key in one session yields a clone of the same
/// handle, so mutations made through [`write`](Self::write) are what the
/// context sees when it checks for changes on close.
pub struct EntityRef<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> EntityRef<T> {
    pub(crate) fn new(entity: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(entity)),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write().await
    }

    /// True when both handles point at the same instance.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.inner, &other.inner)
    }
}

impl<T> Clone for EntityRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for EntityRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_read() {
            Ok(entity) => f.debug_tuple("EntityRef").field(&*entity).finish(),
            Err(_) => f.write_str("EntityRef(<locked>)"),
        }
    }
}

/// Current values of every mapped column, in column order.
pub(crate) fn column_values<T: Entity>(entity: &T, metadata: &EntityMetadata) -> Result<Vec<Value>> {
    metadata
        .columns()
        .iter()
        .map(|mapping| entity.get_field(mapping.field))
        .collect()
}

/// Type-erased view of a cached entity.
#[async_trait]
pub(crate) trait TrackedEntity: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    async fn column_values(&self, metadata: &EntityMetadata) -> Result<Vec<Value>>;
}

#[async_trait]
impl<T: Entity> TrackedEntity for EntityRef<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn column_values(&self, metadata: &EntityMetadata) -> Result<Vec<Value>> {
        let entity = self.read().await;
        column_values(&*entity, metadata)
    }
}

/// Identity map entry: the entity plus the metadata needed to flush it.
#[derive(Clone)]
pub(crate) struct CachedEntity {
    pub(crate) entity: Arc<dyn TrackedEntity>,
    pub(crate) metadata: Arc<EntityMetadata>,
}
