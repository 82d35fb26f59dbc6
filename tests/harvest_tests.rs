//! End-to-end harvest tests
//!
//! These run whole stage plans against a wiremock upstream and assert on
//! the durable store, the per-stage outcomes, and the number of calls the
//! upstream actually saw.

use seine::api::HttpApiClient;
use seine::config::load_config_str;
use seine::store::{EntityType, FsStore, RecordStore};
use seine::Pipeline;
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use wiremock::matchers::{any, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Three-stage plan: seed group, a member sample, then all their friends
fn harvest_config(base_url: &str, store_root: &Path) -> seine::Config {
    let content = format!(
        r#"
[api]
base-url = "{base_url}"
version = "5.122"

[credentials]
tokens = ["t1", "t2"]

[store]
root = "{root}"

[runner]
fetch-workers = 4
verify-workers = 2

[methods.group-profile]
method = "groups.getById"
field = "profile"
extract = ["response", "0"]
[methods.group-profile.bind.group]
group_id = "{{id}}"

[methods.profile]
method = "users.get"
extract = ["response", "0"]
[methods.profile.bind.user]
user_ids = "{{id}}"

[methods.friends]
method = "friends.get"
extract = ["response", "items"]
[methods.friends.bind.user]
user_id = "{{id}}"

[methods.groups]
method = "groups.get"
extract = ["response", "items"]
[methods.groups.bind.user]
user_id = "{{id}}"

[methods.members]
method = "groups.getMembers"
paged = true
extract = ["response", "items"]
[methods.members.params]
count = -1
[methods.members.bind.group]
group_id = "{{id}}"

[methods.posts]
method = "wall.get"
extract = ["response", "items"]
[methods.posts.bind.user]
owner_id = "{{id}}"
[methods.posts.bind.group]
owner_id = "-{{id}}"

[[stage]]
name = "seed-group"
entity = "group"
ids = [1]
include = ["group-profile", "members", "posts"]
[stage.overrides.members]
count = 3

[[stage]]
name = "members"
entity = "user"
include = ["profile", "friends", "groups", "posts"]
[stage.sample]
from = "seed-group"
count = 3

[[stage]]
name = "friends-of-members"
entity = "user"
include = ["profile", "friends", "groups", "posts"]
[stage.sample]
from = "members"
count = 20
per-entity = true
only-verified = true
"#,
        base_url = base_url,
        root = store_root.display(),
    );
    load_config_str(&content).expect("test config must be valid")
}

const MEMBER_IDS: [u64; 5] = [101, 102, 103, 104, 105];

fn friend_ids() -> Vec<u64> {
    (301..=312).collect()
}

/// Mounts a healthy upstream: one verifiable group, and identical
/// verifiable users behind every user-method call
async fn mount_upstream(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/method/groups.getById"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": [{
                "id": 1, "is_closed": 0, "members_count": 5000,
                "has_photo": true, "activity": "music",
                "name": "n".repeat(200),
                "description": "d".repeat(200),
                "status": "s".repeat(200)
            }]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/method/groups.getMembers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {"count": MEMBER_IDS.len(), "items": MEMBER_IDS}
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/method/users.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": [{
                "id": 0, "sex": 2, "verified": 0,
                "city": {"id": 1, "title": "Riga"},
                "followers_count": 40, "has_photo": 1
            }]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/method/friends.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {"items": friend_ids()}
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/method/groups.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {"items": [10, 20, 30, 40, 50]}
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/method/wall.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {"items": [
                {"text": "a post that is certainly longer than thirty characters"},
                {"text": "another post that is also longer than thirty characters"}
            ]}
        })))
        .mount(server)
        .await;
}

async fn run_pipeline(config: seine::Config) -> Pipeline<HttpApiClient> {
    let client = Arc::new(HttpApiClient::new(&config.api).unwrap());
    let mut pipeline = Pipeline::new(config, client, None).unwrap();
    pipeline.run().await.unwrap();
    pipeline
}

#[tokio::test]
async fn test_full_three_stage_harvest() {
    let server = MockServer::start().await;
    mount_upstream(&server).await;
    let dir = tempfile::TempDir::new().unwrap();

    let pipeline = run_pipeline(harvest_config(&server.uri(), dir.path())).await;
    let store = FsStore::open(dir.path()).unwrap();

    // Stage 1: the seed group is stored, verified, with a sampled member
    // list of the overridden size
    let seed = pipeline.outcome("seed-group").unwrap();
    assert_eq!(seed.raw, HashSet::from([1]));
    assert_eq!(seed.verified, HashSet::from([1]));
    assert_eq!(seed.stats.fetched, 1);
    assert_eq!(seed.stats.restarts, 0);

    let group = store.load(EntityType::Group, 1).unwrap();
    let stored_members: Vec<u64> = group["members"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_u64())
        .collect();
    assert_eq!(stored_members.len(), 3);
    assert!(stored_members.iter().all(|id| MEMBER_IDS.contains(id)));

    // Stage 2: the frontier is exactly the stored member sample
    let members = pipeline.outcome("members").unwrap();
    assert_eq!(members.raw, stored_members.iter().copied().collect());
    assert_eq!(members.verified, members.raw, "mocked users are verifiable");

    // Stage 3: per-entity expansion over verified members; the requested
    // size exceeds every friend list, so the whole union comes back
    let expanded = pipeline.outcome("friends-of-members").unwrap();
    let friends: HashSet<u64> = friend_ids().into_iter().collect();
    assert_eq!(expanded.raw, friends);
    assert!(expanded.raw.len() <= 20 * members.verified.len());

    // Every member and every friend is durably stored
    let users = store.discover(EntityType::User).unwrap();
    for id in members.raw.union(&expanded.raw) {
        assert!(users.contains(id));
    }
}

#[tokio::test]
async fn test_rerun_issues_zero_fetches_for_stored_ids() {
    let server = MockServer::start().await;
    mount_upstream(&server).await;
    let dir = tempfile::TempDir::new().unwrap();

    run_pipeline(harvest_config(&server.uri(), dir.path())).await;

    // Re-run the same plan against an upstream that must never be called
    let silent = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&silent)
        .await;

    let pipeline = run_pipeline(harvest_config(&silent.uri(), dir.path())).await;

    let members = pipeline.outcome("members").unwrap();
    assert_eq!(members.stats.fetched, 0);
    assert_eq!(members.stats.cached, members.stats.total);

    let expanded = pipeline.outcome("friends-of-members").unwrap();
    assert_eq!(expanded.stats.fetched, 0);
    // Dropping `silent` verifies the zero-call expectation
}

#[tokio::test]
async fn test_corrupt_record_triggers_restart_and_refetch() {
    let server = MockServer::start().await;
    mount_upstream(&server).await;
    let dir = tempfile::TempDir::new().unwrap();

    // A damaged record already on disk: discoverable, but evicted the
    // moment verification loads it
    let store = FsStore::open(dir.path()).unwrap();
    std::fs::write(dir.path().join("groups/1.json"), b"{damaged").unwrap();
    assert!(store.exists(EntityType::Group, 1));

    let pipeline = run_pipeline(harvest_config(&server.uri(), dir.path())).await;

    let seed = pipeline.outcome("seed-group").unwrap();
    assert_eq!(seed.stats.restarts, 1);
    assert_eq!(seed.stats.fetched, 1, "the id was refetched after eviction");
    assert_eq!(seed.verified, HashSet::from([1]));

    // The refetched record is intact
    let group = store.load(EntityType::Group, 1).unwrap();
    assert!(group.contains_key("members"));
    assert!(group.contains_key("profile"));
}

#[tokio::test]
async fn test_quota_exhausted_tokens_removed_but_run_completes() {
    let server = MockServer::start().await;

    // Every wall.get answer is a quota error; everything else is healthy
    Mock::given(method("GET"))
        .and(path("/method/wall.get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"error": {"error_code": 29, "error_msg": "Rate limit reached"}}),
        ))
        .mount(&server)
        .await;
    mount_upstream(&server).await;

    let dir = tempfile::TempDir::new().unwrap();
    let pipeline = run_pipeline(harvest_config(&server.uri(), dir.path())).await;
    let store = FsStore::open(dir.path()).unwrap();

    // The posts alias degraded to an omitted field; the rest of the
    // record landed and no user verifies without posts
    let seed = pipeline.outcome("seed-group").unwrap();
    assert_eq!(seed.raw, HashSet::from([1]));
    let group = store.load(EntityType::Group, 1).unwrap();
    assert!(group.contains_key("profile"));
    assert!(!group.contains_key("posts"));

    let members = pipeline.outcome("members").unwrap();
    assert_eq!(members.raw.len(), 3);
    assert!(members.verified.is_empty());

    // only-verified expansion over an empty verified set yields an empty
    // stage, which still completes
    let expanded = pipeline.outcome("friends-of-members").unwrap();
    assert!(expanded.raw.is_empty());
}
