use crate::config::resolve::resolve_plan;
use crate::config::types::Config;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads, parses and validates a configuration file
///
/// Validation covers everything that must be fatal before the first fetch:
/// the extends graph, stage references, relation pairings and worker pool
/// widths.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_str(&content)
}

/// Parses and validates configuration from a TOML string
pub fn load_config_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    // Resolution doubles as validation; the runner resolves again when it
    // builds its plan.
    resolve_plan(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// The hash is logged at startup and stamped into the credential snapshot
/// so a dump can be matched to the run that produced it.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
