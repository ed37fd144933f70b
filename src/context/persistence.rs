use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

use super::entity::{CachedEntity, EntityRef};
use super::identity_map::IdentityMap;
use super::snapshot::{Snapshot, SnapshotStore};
use super::{ContextConfig, EntityKey, FlushPolicy};
use crate::connection::{Connection, ConnectionProvider};
use crate::core::{FlushErrors, FlushFailure, OrmError, Result, Value};
use crate::metadata::{Entity, EntityMetadata, MetadataResolver};
use crate::result::QueryResult;
use crate::sql::SqlBuilder;

/// Lifecycle of a persistence context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// A session over one connection provider.
///
/// `find` loads an entity by primary key once per session and keeps handing
/// out the same [`EntityRef`]. `close` writes back every entity whose mapped
/// columns changed since it was loaded, then forgets all of them.
///
/// `find` may be called concurrently from many tasks. `close` takes the
/// session lock exclusively: it waits for in-flight finds, and any `find`
/// issued afterwards fails with `IllegalState`. Callers must not hold an
/// entity write guard across `close`, because the change check reads every
/// cached entity.
pub struct PersistenceContext<P: ConnectionProvider> {
    provider: P,
    config: ContextConfig,
    resolver: MetadataResolver,
    builder: SqlBuilder,
    identity_map: IdentityMap<EntityKey, CachedEntity>,
    snapshots: SnapshotStore,
    state: RwLock<SessionState>,
}

impl<P: ConnectionProvider> PersistenceContext<P> {
    pub fn new(provider: P) -> Self {
        Self::with_config(provider, ContextConfig::default())
    }

    pub fn with_config(provider: P, config: ContextConfig) -> Self {
        let builder = SqlBuilder::new(provider.placeholder_style());
        Self {
            provider,
            config,
            resolver: MetadataResolver::new(),
            builder,
            identity_map: IdentityMap::new(),
            snapshots: SnapshotStore::new(),
            state: RwLock::new(SessionState::Open),
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn is_open(&self) -> bool {
        self.state().await == SessionState::Open
    }

    /// Number of entities currently cached.
    pub fn cached_count(&self) -> usize {
        self.identity_map.len()
    }

    /// Whether the entity with this key has been loaded in this session.
    pub fn contains<T: Entity>(&self, id: impl Into<Value>) -> bool {
        match self.key_for::<T>(id.into()) {
            Ok((key, _)) => self.identity_map.contains(&key),
            Err(_) => false,
        }
    }

    /// Loads the entity of type `T` with primary key `id`, or returns the
    /// instance already loaded in this session.
    pub async fn find<T: Entity>(&self, id: impl Into<Value>) -> Result<EntityRef<T>> {
        let state = self.state.read().await;
        if *state != SessionState::Open {
            return Err(OrmError::IllegalState(format!(
                "cannot find {}: persistence context is {}",
                std::any::type_name::<T>(),
                *state
            )));
        }

        let (key, metadata) = self.key_for::<T>(id.into())?;
        let cached = self
            .identity_map
            .get_or_load(key.clone(), || self.load::<T>(&key, metadata))
            .await?;

        cached
            .entity
            .as_any()
            .downcast_ref::<EntityRef<T>>()
            .cloned()
            .ok_or_else(|| OrmError::TypeMismatch(format!("cached entry {} has another type", key)))
    }

    /// Writes back changed entities and empties the session.
    ///
    /// Closing a closed context does nothing. How failed writes are handled
    /// is set by [`FlushPolicy`].
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state == SessionState::Closed {
            return Ok(());
        }
        *state = SessionState::Closing;

        let entries = self.identity_map.entries()?;
        let mut errors = FlushErrors::default();
        let mut flushed = 0usize;

        for (key, cached) in &entries {
            match self.flush_entry(key, cached).await {
                Ok(false) => {}
                Ok(true) => {
                    errors.attempted += 1;
                    flushed += 1;
                }
                Err(error) => {
                    errors.attempted += 1;
                    if self.config.flush_policy == FlushPolicy::AbortOnFirst {
                        warn!(entity = %key, %error, "flush aborted, context stays open");
                        *state = SessionState::Open;
                        return Err(error);
                    }
                    warn!(entity = %key, %error, "flush failed");
                    errors.failures.push(FlushFailure {
                        entity_key: key.to_string(),
                        error,
                    });
                }
            }
        }

        self.identity_map.clear()?;
        self.snapshots.clear()?;
        *state = SessionState::Closed;

        info!(
            cached = entries.len(),
            flushed,
            failed = errors.len(),
            "persistence context closed"
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(OrmError::Flush(errors))
        }
    }

    fn key_for<T: Entity>(&self, id: Value) -> Result<(EntityKey, Arc<EntityMetadata>)> {
        let metadata = self.resolver.resolve::<T>()?;
        let id = id.normalize_for(metadata.primary_key().data_type);
        Ok((EntityKey::of::<T>(metadata.entity_name(), id), metadata))
    }

    async fn load<T: Entity>(&self, key: &EntityKey, metadata: Arc<EntityMetadata>) -> Result<CachedEntity> {
        trace!(entity = %key, "identity map miss");

        let statement = self.builder.select_statement(&metadata, key.id().clone());
        trace!(sql = statement.sql(), "synthesized select");

        let result = {
            let mut connection = self.provider.acquire().await?;
            connection.query(&statement).await?
        };

        match result.row_count() {
            0 => {
                return Err(OrmError::NotFound {
                    entity: metadata.entity_name(),
                    key: key.id().clone(),
                });
            }
            1 => {}
            rows => warn!(entity = %key, rows, "select by primary key returned more than one row"),
        }

        let entity = materialize::<T>(&metadata, &result)?;
        self.snapshots
            .insert(key.clone(), Snapshot::capture(&entity, &metadata)?)?;

        Ok(CachedEntity {
            entity: Arc::new(EntityRef::new(entity)),
            metadata,
        })
    }

    /// Returns whether an UPDATE was issued.
    async fn flush_entry(&self, key: &EntityKey, cached: &CachedEntity) -> Result<bool> {
        let metadata = &cached.metadata;
        let current = cached.entity.column_values(metadata).await?;
        let snapshot = self
            .snapshots
            .get(key)?
            .ok_or_else(|| OrmError::IllegalState(format!("no snapshot recorded for {}", key)))?;

        if !snapshot.differs(&current) {
            debug!(entity = %key, "clean, skipping");
            return Ok(false);
        }
        let changed = snapshot.changed_columns(&current, metadata);
        let pk_column = metadata.primary_key().column;
        if changed.contains(&pk_column) {
            warn!(
                entity = %key,
                column = pk_column,
                "primary key changed after load, the new key is not persisted"
            );
        }

        // The key is bound from the entity key, so an entity mapping nothing
        // else has nothing to write.
        let Some(statement) = self
            .builder
            .update_statement(metadata, &current, key.id().clone())
        else {
            debug!(entity = %key, "no writable columns, skipping");
            return Ok(false);
        };
        debug!(entity = %key, ?changed, "dirty, flushing");
        trace!(sql = statement.sql(), "synthesized update");

        let affected = {
            let mut connection = self.provider.acquire().await?;
            connection.execute(&statement).await?
        };

        if self.config.strict_update_count && affected != 1 {
            return Err(OrmError::UnexpectedUpdateCount {
                entity: metadata.entity_name(),
                key: key.id().clone(),
                affected,
            });
        }
        Ok(true)
    }
}

impl<P: ConnectionProvider> Drop for PersistenceContext<P> {
    fn drop(&mut self) {
        let open = self
            .state
            .try_read()
            .map(|state| *state == SessionState::Open)
            .unwrap_or(false);
        let cached = self.identity_map.len();
        if open && cached > 0 {
            warn!(cached, "persistence context dropped without close, pending changes discarded");
        }
    }
}

/// Builds an entity from the first row: default construction, then every
/// mapped column assigned to its field. Result columns with no mapping are
/// ignored.
fn materialize<T: Entity>(metadata: &EntityMetadata, result: &QueryResult) -> Result<T> {
    let mut entity = T::default();
    for mapping in metadata.columns() {
        let value = result.get(0, mapping.column).cloned().ok_or_else(|| {
            OrmError::QueryExecution(format!(
                "result of {} has no column '{}'",
                metadata.table(),
                mapping.column
            ))
        })?;
        entity.set_field(mapping.field, value).map_err(|e| match e {
            OrmError::Instantiation { .. } => e,
            other => OrmError::instantiation(metadata.entity_name(), other.to_string()),
        })?;
    }
    Ok(entity)
}
