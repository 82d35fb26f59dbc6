//! Configuration for Seine
//!
//! The TOML document declares the upstream endpoint, the credential set,
//! the record store root, worker pool widths, the request-method catalogue
//! and the stage plan. [`resolve::resolve_plan`] turns the catalogue and
//! stage declarations into an executable plan before any fetch runs.

mod parser;
mod resolve;
mod types;

pub use parser::{compute_config_hash, load_config, load_config_str, load_config_with_hash};
pub use resolve::{resolve_plan, BoundRequest, ResolvedRequest, StagePlan};
pub use types::{
    ApiConfig, Config, CredentialsConfig, RequestTemplate, RunnerConfig, SampleSpec, StageDecl,
    StoreConfig,
};
