//! Seine: a resumable social-graph harvester
//!
//! This crate crawls a social graph exposed by a quota-limited remote API.
//! Starting from seed entity ids it fetches each entity's attributes and
//! graph relations, expands the frontier by sampling those relations, and
//! repeats across declared stages. Every fetched entity is persisted
//! durably, so a run can be interrupted and resumed without re-issuing
//! fetches for ids that are already on disk.

pub mod api;
pub mod config;
pub mod fetcher;
pub mod pool;
pub mod runner;
pub mod sample;
pub mod store;
pub mod verify;

use store::EntityType;
use thiserror::Error;

/// Main error type for Seine operations
#[derive(Debug, Error)]
pub enum SeineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    #[error("Credential pool error: {0}")]
    Pool(#[from] pool::PoolError),

    #[error("Upstream API error: {0}")]
    Api(#[from] api::ApiError),

    #[error("Stage '{stage}' restarted {retries} times after repeated store races, giving up")]
    RetriesExhausted { stage: String, retries: u32 },
}

/// Configuration-specific errors
///
/// All of these are fatal at startup or at stage-plan resolution; nothing
/// in this enum is produced mid-crawl.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown request alias '{0}' in method catalogue")]
    UnknownAlias(String),

    #[error("Cycle in extends chain at alias '{0}'")]
    ExtendsCycle(String),

    #[error("Stage '{from}' references unknown or later stage '{to}'")]
    UnknownStage { from: String, to: String },

    // Field names avoid `source`, which thiserror reserves for error
    // chaining
    #[error("No relation from {from} to {to} in the graph")]
    InvalidRelation { from: EntityType, to: EntityType },
}

/// Result type alias for Seine operations
pub type Result<T> = std::result::Result<T, SeineError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use fetcher::Fetcher;
pub use pool::CredentialPool;
pub use runner::Pipeline;
pub use store::{EntityId, FsStore, Record, RecordStore};
pub use verify::{verify, VerifyThresholds};
