//! Stage lifecycle types

use crate::store::{EntityId, EntityType};
use std::collections::HashSet;
use std::time::Duration;

/// Lifecycle of one stage
///
/// `Verifying` can fall back to `Fetching` when a store race is detected;
/// every other edge moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePhase {
    Pending,
    Fetching,
    Verifying,
    Completed,
}

/// Counters reported when a stage completes
#[derive(Debug, Clone, Default)]
pub struct StageStats {
    /// Size of the stage's resolved id set
    pub total: usize,
    /// Ids already present in the store before dispatch
    pub cached: usize,
    /// Ids fetched by this stage's workers
    pub fetched: usize,
    /// Ids whose record passed verification
    pub verified: usize,
    /// Restarts taken after detected store races
    pub restarts: u32,
    pub elapsed: Duration,
}

/// A completed stage's outputs, readable by later stages
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub entity: EntityType,
    /// The full resolved id set
    pub raw: HashSet<EntityId>,
    /// The subset whose records passed verification
    pub verified: HashSet<EntityId>,
    pub stats: StageStats,
}
