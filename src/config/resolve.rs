//! Catalogue and stage-plan resolution
//!
//! Everything here runs before the first fetch. `extends` chains in the
//! method catalogue are merged in one explicit, cycle-checked pass, stage
//! declarations are validated against the catalogue and against each
//! other, and the result is a flat plan the runner can execute without
//! further lookups. Id placeholders stay unbound until the fetcher binds
//! them per entity.

use crate::api::Params;
use crate::config::types::{Config, RequestTemplate, StageDecl};
use crate::sample::relation_field;
use crate::store::{EntityId, EntityType};
use crate::ConfigError;
use crate::ConfigResult;
use std::collections::{BTreeMap, HashMap, HashSet};

/// A catalogue entry after extends resolution and stage overrides, still
/// holding the unbound `{id}` templates for one entity type
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub alias: String,
    pub method: String,
    pub params: Params,
    /// param name -> template string with an `{id}` placeholder
    pub bind: BTreeMap<String, String>,
    pub extract: Vec<String>,
    pub paged: bool,
    /// Record key the extracted value is stored under
    pub field: String,
}

/// A fully bound request for one concrete entity id
#[derive(Debug, Clone)]
pub struct BoundRequest {
    pub alias: String,
    pub method: String,
    pub params: Params,
    pub extract: Vec<String>,
    pub paged: bool,
    pub field: String,
}

impl ResolvedRequest {
    /// Substitutes the id placeholder into every bound parameter
    pub fn bound(&self, id: EntityId) -> BoundRequest {
        let mut params = self.params.clone();
        let id = id.to_string();
        for (param, template) in &self.bind {
            params.insert(
                param.clone(),
                serde_json::Value::String(template.replace("{id}", &id)),
            );
        }
        BoundRequest {
            alias: self.alias.clone(),
            method: self.method.clone(),
            params,
            extract: self.extract.clone(),
            paged: self.paged,
            field: self.field.clone(),
        }
    }
}

/// One stage with its request set fully resolved
#[derive(Debug, Clone)]
pub struct StagePlan {
    pub decl: StageDecl,
    pub requests: Vec<ResolvedRequest>,
}

/// Resolves the whole configuration into an executable plan
///
/// Fails with a [`ConfigError`] on extends cycles, unknown aliases,
/// forward or unknown stage references, invalid relation pairings, or a
/// stage that declares both (or neither of) literal ids and a sample spec.
pub fn resolve_plan(config: &Config) -> ConfigResult<Vec<StagePlan>> {
    validate_runner(config)?;
    let catalogue = resolve_catalogue(&config.methods)?;

    let mut seen: HashMap<String, EntityType> = HashMap::new();
    let mut plan = Vec::with_capacity(config.stages.len());

    for decl in &config.stages {
        if seen.contains_key(&decl.name) {
            return Err(ConfigError::Validation(format!(
                "duplicate stage name '{}'",
                decl.name
            )));
        }
        validate_id_source(decl, &seen)?;
        let requests = resolve_stage_requests(decl, &catalogue)?;
        seen.insert(decl.name.clone(), decl.entity);
        plan.push(StagePlan {
            decl: decl.clone(),
            requests,
        });
    }

    if plan.is_empty() {
        return Err(ConfigError::Validation("no stages declared".to_string()));
    }
    Ok(plan)
}

fn validate_runner(config: &Config) -> ConfigResult<()> {
    if config.credentials.tokens.is_empty() {
        return Err(ConfigError::Validation(
            "credentials.tokens must not be empty".to_string(),
        ));
    }
    if config.runner.fetch_workers == 0 || config.runner.verify_workers == 0 {
        return Err(ConfigError::Validation(
            "runner worker pool widths must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_id_source(decl: &StageDecl, seen: &HashMap<String, EntityType>) -> ConfigResult<()> {
    match (&decl.sample, decl.ids.is_empty()) {
        (Some(_), false) => Err(ConfigError::Validation(format!(
            "stage '{}' declares both literal ids and a sample source",
            decl.name
        ))),
        (None, true) => Err(ConfigError::Validation(format!(
            "stage '{}' declares neither literal ids nor a sample source",
            decl.name
        ))),
        (Some(sample), true) => {
            // Stages may only sample from stages declared earlier
            let source_entity = seen.get(&sample.from).copied().ok_or_else(|| {
                ConfigError::UnknownStage {
                    from: decl.name.clone(),
                    to: sample.from.clone(),
                }
            })?;
            relation_field(source_entity, decl.entity)?;
            Ok(())
        }
        (None, false) => Ok(()),
    }
}

/// Merges every extends chain in the catalogue, root first
fn resolve_catalogue(
    methods: &BTreeMap<String, RequestTemplate>,
) -> ConfigResult<BTreeMap<String, RequestTemplate>> {
    let mut resolved = BTreeMap::new();
    for alias in methods.keys() {
        let merged = resolve_chain(alias, methods, &mut HashSet::new())?;
        resolved.insert(alias.clone(), merged);
    }
    Ok(resolved)
}

fn resolve_chain(
    alias: &str,
    methods: &BTreeMap<String, RequestTemplate>,
    visiting: &mut HashSet<String>,
) -> ConfigResult<RequestTemplate> {
    if !visiting.insert(alias.to_string()) {
        return Err(ConfigError::ExtendsCycle(alias.to_string()));
    }
    let template = methods
        .get(alias)
        .ok_or_else(|| ConfigError::UnknownAlias(alias.to_string()))?;

    let Some(parent_alias) = &template.extends else {
        return Ok(template.clone());
    };
    let parent = resolve_chain(parent_alias, methods, visiting)?;
    Ok(merge_templates(&parent, template))
}

/// Child entries win over parent entries; `paged` is sticky
fn merge_templates(parent: &RequestTemplate, child: &RequestTemplate) -> RequestTemplate {
    let mut params = parent.params.clone();
    params.extend(child.params.clone());

    let mut bind = parent.bind.clone();
    for (entity, child_bindings) in &child.bind {
        bind.entry(*entity).or_default().extend(child_bindings.clone());
    }

    RequestTemplate {
        method: child.method.clone().or_else(|| parent.method.clone()),
        params,
        bind,
        extract: if child.extract.is_empty() {
            parent.extract.clone()
        } else {
            child.extract.clone()
        },
        paged: child.paged || parent.paged,
        field: child.field.clone().or_else(|| parent.field.clone()),
        extends: None,
    }
}

fn resolve_stage_requests(
    decl: &StageDecl,
    catalogue: &BTreeMap<String, RequestTemplate>,
) -> ConfigResult<Vec<ResolvedRequest>> {
    if decl.include.is_empty() {
        return Err(ConfigError::Validation(format!(
            "stage '{}' includes no request aliases",
            decl.name
        )));
    }

    let mut requests = Vec::with_capacity(decl.include.len());
    for alias in &decl.include {
        let template = catalogue
            .get(alias)
            .ok_or_else(|| ConfigError::UnknownAlias(alias.clone()))?;

        let method = template.method.clone().ok_or_else(|| {
            ConfigError::Validation(format!("alias '{}' has no upstream method", alias))
        })?;

        let bind = template.bind.get(&decl.entity).cloned().ok_or_else(|| {
            ConfigError::Validation(format!(
                "alias '{}' has no id binding for entity type '{}'",
                alias, decl.entity
            ))
        })?;

        let mut params = template.params.clone();
        if let Some(overrides) = decl.overrides.get(alias) {
            params.extend(overrides.clone());
        }

        requests.push(ResolvedRequest {
            alias: alias.clone(),
            method,
            params,
            bind,
            extract: template.extract.clone(),
            paged: template.paged,
            field: template.field.clone().unwrap_or_else(|| alias.clone()),
        });
    }
    Ok(requests)
}
