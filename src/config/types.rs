use crate::api::Params;
use crate::pool::DEFAULT_DUMP_EVERY;
use crate::store::{EntityId, EntityType};
use crate::verify::VerifyThresholds;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for Seine
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub api: ApiConfig,
    pub credentials: CredentialsConfig,
    pub store: StoreConfig,
    pub runner: RunnerConfig,
    #[serde(default)]
    pub verify: VerifyThresholds,

    /// Request-method catalogue: alias -> template
    pub methods: BTreeMap<String, RequestTemplate>,

    /// Stage declarations, executed in order. Defaults to empty so an
    /// absent `[[stage]]` list is rejected by validation, with a clearer
    /// message than a deserialization failure.
    #[serde(rename = "stage", default)]
    pub stages: Vec<StageDecl>,
}

/// Upstream API endpoint configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiConfig {
    /// Base URL of the API, e.g. "https://api.example.com"
    pub base_url: String,

    /// API version string sent with every request
    pub version: String,
}

/// Credential pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CredentialsConfig {
    /// The token set shared by all workers
    pub tokens: Vec<String>,

    /// Where the periodic pool snapshot is written
    pub snapshot_path: Option<String>,

    /// Snapshot frequency, in successful acquisitions
    #[serde(default = "default_dump_every")]
    pub dump_every: u64,
}

fn default_dump_every() -> u64 {
    DEFAULT_DUMP_EVERY
}

/// Record store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StoreConfig {
    /// Root directory holding users/ and groups/ record dirs
    pub root: String,
}

/// Worker pool and retry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunnerConfig {
    /// Width of the fetch worker pool
    pub fetch_workers: usize,

    /// Width of the verification worker pool
    pub verify_workers: usize,

    /// How many times a stage may restart after a detected store race
    #[serde(default = "default_max_stage_retries")]
    pub max_stage_retries: u32,
}

fn default_max_stage_retries() -> u32 {
    3
}

/// One catalogue entry: a declarative request descriptor
///
/// `extends` chains inherit every field from the parent template; child
/// params and bindings override parent entries, a non-empty child
/// extraction path wins, and `paged` is sticky once set anywhere in the
/// chain.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RequestTemplate {
    /// Upstream method name; may come from the extends parent
    pub method: Option<String>,

    /// Base parameters sent with every call
    #[serde(default)]
    pub params: Params,

    /// Per-entity-type id bindings: entity -> param name -> template
    /// string with an `{id}` placeholder
    #[serde(default)]
    pub bind: BTreeMap<EntityType, BTreeMap<String, String>>,

    /// Ordered keys that unwrap the response envelope
    #[serde(default)]
    pub extract: Vec<String>,

    /// Whether the alias enumerates a list relation page by page
    #[serde(default)]
    pub paged: bool,

    /// Record key the extracted value is stored under; defaults to the
    /// alias name. Lets a per-entity alias like `group-profile` land in
    /// the canonical `profile` slot verification reads.
    pub field: Option<String>,

    /// Alias to inherit defaults from
    pub extends: Option<String>,
}

/// One declared unit of work: resolve ids, fetch missing, verify
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StageDecl {
    pub name: String,

    /// Entity type this stage fetches
    pub entity: EntityType,

    /// Literal seed ids; mutually exclusive with `sample`
    #[serde(default)]
    pub ids: Vec<EntityId>,

    /// Frontier derivation from an earlier stage; mutually exclusive with
    /// `ids`
    pub sample: Option<SampleSpec>,

    /// Catalogue aliases to execute per entity
    pub include: Vec<String>,

    /// Per-alias parameter overrides for this stage
    #[serde(default)]
    pub overrides: BTreeMap<String, Params>,
}

/// Frontier derivation spec
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SampleSpec {
    /// Name of the earlier stage to expand from
    pub from: String,

    /// Sample size (per source entity when `per-entity` is set)
    pub count: usize,

    /// Sample independently from each source entity's relation list
    #[serde(default)]
    pub per_entity: bool,

    /// Expand only from the source stage's verified subset
    #[serde(default)]
    pub only_verified: bool,
}
