//! Frontier expansion by relation sampling
//!
//! Derives one stage's id set from a completed prior stage's records: read
//! the relation field connecting the two entity types, then sample the
//! collected ids uniformly without replacement. The relation graph is
//! fixed (user to user via friends, user to group via subscriptions,
//! group to user via membership) and a pairing outside it is a
//! configuration error.

use crate::store::{EntityId, EntityType, RecordStore};
use crate::{ConfigError, ConfigResult};
use serde_json::Value;
use std::collections::HashSet;

/// Record field holding the relation from `source` to `target`
pub fn relation_field(source: EntityType, target: EntityType) -> ConfigResult<&'static str> {
    match (source, target) {
        (EntityType::User, EntityType::User) => Ok("friends"),
        (EntityType::User, EntityType::Group) => Ok("groups"),
        (EntityType::Group, EntityType::User) => Ok("members"),
        (EntityType::Group, EntityType::Group) => Err(ConfigError::InvalidRelation {
            from: source,
            to: target,
        }),
    }
}

/// Uniform sample without replacement
///
/// Returns the input unchanged when it already fits within `size`.
pub fn take<T>(items: Vec<T>, size: usize) -> Vec<T> {
    if items.len() <= size {
        return items;
    }
    let picked: HashSet<usize> = rand::seq::index::sample(&mut rand::rng(), items.len(), size)
        .into_iter()
        .collect();
    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| picked.contains(&i).then_some(item))
        .collect()
}

/// Expands a source stage's id set into the next stage's frontier
///
/// Missing, corrupt or relation-less records contribute nothing. With
/// `per_entity` set, up to `size` ids are drawn independently from each
/// source entity's relation list and the draws are unioned; otherwise all
/// relation lists are pooled, deduplicated and sampled once. The result is
/// always a set, so duplicates collapse before any fetch pass.
pub fn expand<S: RecordStore + ?Sized>(
    store: &S,
    source: EntityType,
    target: EntityType,
    size: usize,
    source_ids: &HashSet<EntityId>,
    per_entity: bool,
) -> ConfigResult<HashSet<EntityId>> {
    let field = relation_field(source, target)?;

    let mut frontier = HashSet::new();
    if per_entity {
        for &id in source_ids {
            let relations = relation_ids(store, source, id, field);
            frontier.extend(take(dedup(relations), size));
        }
    } else {
        let mut pool = Vec::new();
        for &id in source_ids {
            pool.extend(relation_ids(store, source, id, field));
        }
        frontier.extend(take(dedup(pool), size));
    }
    Ok(frontier)
}

fn dedup(ids: Vec<EntityId>) -> Vec<EntityId> {
    let unique: HashSet<EntityId> = ids.into_iter().collect();
    unique.into_iter().collect()
}

fn relation_ids<S: RecordStore + ?Sized>(
    store: &S,
    entity: EntityType,
    id: EntityId,
    field: &str,
) -> Vec<EntityId> {
    let record = match store.load(entity, id) {
        Ok(record) => record,
        Err(e) => {
            tracing::debug!("Skipping {} {} during expansion: {}", entity, id, e);
            return Vec::new();
        }
    };
    record
        .get(field)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_u64).collect())
        .unwrap_or_default()
}
