//! Record completeness verification
//!
//! A pure predicate battery deciding whether a stored record is complete
//! enough to seed further expansion or be used downstream. Verification
//! never raises: any missing key or malformed value makes the whole
//! battery evaluate to false. The predicates are read-only and safe to run
//! over many ids concurrently.

use crate::store::{EntityType, Record};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

/// Minimum-quality thresholds for the predicate batteries
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct VerifyThresholds {
    /// Minimum friend-list length for a user
    pub min_friends: usize,

    /// Minimum number of distinct meaningful posts for a user
    pub min_posts: usize,

    /// Minimum normalized text length for a post to count as meaningful
    pub min_post_chars: usize,

    /// Minimum group-membership count for a user
    pub min_groups: usize,

    /// Minimum combined name+description+status length for a group
    pub min_description_chars: usize,

    /// Minimum member count for a group
    pub min_members: u64,
}

impl Default for VerifyThresholds {
    fn default() -> Self {
        Self {
            min_friends: 10,
            min_posts: 2,
            min_post_chars: 30,
            min_groups: 5,
            min_description_chars: 500,
            min_members: 50,
        }
    }
}

const REQUIRED_USER_FIELDS: [&str; 5] = ["id", "sex", "verified", "city", "followers_count"];
const REQUIRED_GROUP_FIELDS: [&str; 3] = ["id", "members_count", "activity"];

/// Decides whether a stored record passes its type's battery
pub fn verify(entity: EntityType, record: &Record, thresholds: &VerifyThresholds) -> bool {
    match entity {
        EntityType::User => verify_user(record, thresholds).is_some(),
        EntityType::Group => verify_group(record, thresholds).is_some(),
    }
}

// The batteries thread Option so that a single missing key or shape
// mismatch short-circuits to "fails" without panicking.

fn verify_user(record: &Record, t: &VerifyThresholds) -> Option<()> {
    let profile = record.get("profile")?.as_object()?;

    if !truthy(profile.get("has_photo")?) {
        return None;
    }
    if record.get("friends")?.as_array()?.len() < t.min_friends {
        return None;
    }

    let texts: HashSet<String> = record
        .get("posts")?
        .as_array()?
        .iter()
        .filter_map(|post| post.get("text")?.as_str().map(normalize))
        .collect();
    // Thresholds are in characters, not bytes
    if texts
        .iter()
        .filter(|text| text.chars().count() > t.min_post_chars)
        .count()
        < t.min_posts
    {
        return None;
    }

    if record.get("groups")?.as_array()?.len() < t.min_groups {
        return None;
    }
    if !REQUIRED_USER_FIELDS.iter().all(|f| profile.contains_key(*f)) {
        return None;
    }
    Some(())
}

fn verify_group(record: &Record, t: &VerifyThresholds) -> Option<()> {
    let group = record.get("profile")?.as_object()?;

    if group.get("is_closed")?.as_i64()? != 0 {
        return None;
    }
    if group.contains_key("deactivated") {
        return None;
    }

    let description: usize = ["name", "description", "status"]
        .iter()
        .map(|field| {
            group
                .get(*field)
                .and_then(Value::as_str)
                .map(|s| normalize(s).chars().count())
                .unwrap_or(0)
        })
        .sum();
    if description < t.min_description_chars {
        return None;
    }

    if group.get("members_count")?.as_u64()? < t.min_members {
        return None;
    }
    if !truthy(group.get("has_photo")?) {
        return None;
    }
    if !REQUIRED_GROUP_FIELDS.iter().all(|f| group.contains_key(*f)) {
        return None;
    }
    Some(())
}

/// Collapses runs of whitespace to single spaces
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The upstream encodes flags as both booleans and 0/1 integers
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().map_or(false, |n| n != 0),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record_from(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    fn good_user() -> Record {
        record_from(json!({
            "profile": {
                "id": 1, "sex": 2, "verified": 0,
                "city": {"id": 1, "title": "Riga"},
                "followers_count": 120, "has_photo": 1
            },
            "friends": (0..15).collect::<Vec<u64>>(),
            "groups": [10, 20, 30, 40, 50],
            "posts": [
                {"text": "a post that is certainly longer than thirty characters"},
                {"text": "another post that is certainly longer than thirty characters"}
            ]
        }))
    }

    fn good_group() -> Record {
        record_from(json!({
            "profile": {
                "id": 2, "is_closed": 0, "members_count": 5000,
                "has_photo": true, "activity": "music",
                "name": "n".repeat(100),
                "description": "d".repeat(300),
                "status": "s".repeat(200)
            },
            "members": [1, 2, 3]
        }))
    }

    #[test]
    fn test_good_user_passes() {
        assert!(verify(EntityType::User, &good_user(), &VerifyThresholds::default()));
    }

    #[test]
    fn test_good_group_passes() {
        assert!(verify(EntityType::Group, &good_group(), &VerifyThresholds::default()));
    }

    #[test]
    fn test_user_without_photo_fails() {
        let mut record = good_user();
        record["profile"]["has_photo"] = json!(0);
        assert!(!verify(EntityType::User, &record, &VerifyThresholds::default()));
    }

    #[test]
    fn test_user_with_few_friends_fails() {
        let mut record = good_user();
        record["friends"] = json!([1, 2, 3]);
        assert!(!verify(EntityType::User, &record, &VerifyThresholds::default()));
    }

    #[test]
    fn test_duplicate_post_texts_count_once() {
        let mut record = good_user();
        let text = "the same long post text repeated over and over again here";
        record["posts"] = json!([{"text": text}, {"text": text}]);
        assert!(!verify(EntityType::User, &record, &VerifyThresholds::default()));
    }

    #[test]
    fn test_post_whitespace_is_normalized() {
        let mut record = good_user();
        // Lots of whitespace around very short words: normalized length
        // stays under the threshold
        record["posts"] = json!([
            {"text": "  a   b\n\n c   d   e   f   g   h  "},
            {"text": "  i   j\t\t k   l   m   n   o   p  "}
        ]);
        assert!(!verify(EntityType::User, &record, &VerifyThresholds::default()));
    }

    #[test]
    fn test_closed_group_fails_regardless_of_other_fields() {
        let mut record = good_group();
        record["profile"]["is_closed"] = json!(1);
        assert!(!verify(EntityType::Group, &record, &VerifyThresholds::default()));
    }

    #[test]
    fn test_deactivated_group_fails() {
        let mut record = good_group();
        record["profile"]["deactivated"] = json!("banned");
        assert!(!verify(EntityType::Group, &record, &VerifyThresholds::default()));
    }

    #[test]
    fn test_short_description_fails() {
        let mut record = good_group();
        record["profile"]["name"] = json!("short");
        record["profile"]["description"] = json!("");
        record["profile"]["status"] = json!("");
        assert!(!verify(EntityType::Group, &record, &VerifyThresholds::default()));
    }

    #[test]
    fn test_description_threshold_counts_characters_not_bytes() {
        // 300 Cyrillic characters are 600 UTF-8 bytes; only the character
        // count may satisfy the 500 minimum
        let mut record = good_group();
        record["profile"]["name"] = json!("");
        record["profile"]["description"] = json!("ж".repeat(300));
        record["profile"]["status"] = json!("");
        assert!(!verify(EntityType::Group, &record, &VerifyThresholds::default()));

        record["profile"]["description"] = json!("ж".repeat(500));
        assert!(verify(EntityType::Group, &record, &VerifyThresholds::default()));
    }

    #[test]
    fn test_post_threshold_counts_characters_not_bytes() {
        let mut record = good_user();
        // 20 Cyrillic characters (40 bytes) stay under the 30 minimum
        record["posts"] = json!([
            {"text": "п".repeat(20)},
            {"text": "р".repeat(20)}
        ]);
        assert!(!verify(EntityType::User, &record, &VerifyThresholds::default()));

        record["posts"] = json!([
            {"text": "п".repeat(31)},
            {"text": "р".repeat(31)}
        ]);
        assert!(verify(EntityType::User, &record, &VerifyThresholds::default()));
    }

    #[test]
    fn test_malformed_records_never_panic() {
        let malformed = [
            json!({}),
            json!({"profile": null}),
            json!({"profile": "not an object"}),
            json!({"profile": {"has_photo": "yes"}}),
            json!({"profile": {"has_photo": 1}, "friends": "not a list"}),
            json!({"profile": {"is_closed": "open"}}),
        ];
        for value in malformed {
            let record = record_from(value);
            assert!(!verify(EntityType::User, &record, &VerifyThresholds::default()));
            assert!(!verify(EntityType::Group, &record, &VerifyThresholds::default()));
        }
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let mut record = good_user();
        record["friends"] = json!([1, 2]);
        let relaxed = VerifyThresholds {
            min_friends: 2,
            ..VerifyThresholds::default()
        };
        assert!(verify(EntityType::User, &record, &relaxed));
    }
}
