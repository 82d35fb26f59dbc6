//! Durable record storage
//!
//! One record is persisted per (entity type, id). A record that exists in
//! the store is treated as immutable truth for that id for the remainder
//! of a run; there is no in-place update path. Corrupt records are evicted
//! on read so their ids become fetchable again.

mod fs;

pub use fs::FsStore;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Numeric entity identifier used throughout the crawl
pub type EntityId = u64;

/// A stored record: storage key (usually the request alias) -> extracted
/// payload
pub type Record = serde_json::Map<String, serde_json::Value>;

/// The two node kinds of the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    User,
    Group,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::User => "user",
            EntityType::Group => "group",
        }
    }

    /// Directory name under the store root holding this type's records
    pub fn dir_name(&self) -> &'static str {
        match self {
            EntityType::User => "users",
            EntityType::Group => "groups",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record for {entity} {id} is damaged and has been evicted")]
    Corrupt { entity: EntityType, id: EntityId },

    #[error("Record for {entity} {id} is not present")]
    Missing { entity: EntityType, id: EntityId },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Trait for id-keyed durable record backends
///
/// Implementations must provide atomic replace semantics for `save` so a
/// concurrent reader never observes a partially written record, and
/// `discover` must re-scan durable state rather than answer from a cache,
/// so writes from other workers are visible.
pub trait RecordStore: Send + Sync {
    /// Checks whether a record is present for the given id
    fn exists(&self, entity: EntityType, id: EntityId) -> bool;

    /// Writes a record, creating or overwriting
    fn save(&self, entity: EntityType, id: EntityId, record: &Record) -> StoreResult<()>;

    /// Reads a record back
    ///
    /// A record whose persisted bytes cannot be decoded is deleted as a
    /// recovery action and reported as [`StoreError::Corrupt`]; the id then
    /// reverts to "not present".
    fn load(&self, entity: EntityType, id: EntityId) -> StoreResult<Record>;

    /// Enumerates every id currently persisted for a type
    fn discover(&self, entity: EntityType) -> StoreResult<HashSet<EntityId>>;
}
