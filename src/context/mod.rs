//! Session-scoped persistence: identity map, load-time snapshots and the
//! [`PersistenceContext`] that ties them to a connection provider.

pub mod config;
mod entity;
pub mod identity_map;
mod key;
mod persistence;
pub mod snapshot;

pub use config::{ContextConfig, FlushPolicy};
pub use entity::EntityRef;
pub use identity_map::IdentityMap;
pub use key::EntityKey;
pub use persistence::{PersistenceContext, SessionState};
pub use snapshot::{Snapshot, SnapshotStore};
