//! Relation maintenance and relation-query reduction end to end.

use std::sync::Arc;

use datagate::{
    Caller, DataGate, DataGateConfig, FindOptions, JsonMap, MemoryStorageAdapter, StorageAdapter,
    UpdateOptions,
};
use serde_json::{json, Value};

fn as_map(value: Value) -> JsonMap {
    value.as_object().cloned().unwrap()
}

fn user_pointer(object_id: &str) -> Value {
    json!({"__type": "Pointer", "className": "_User", "objectId": object_id})
}

async fn setup() -> (Arc<MemoryStorageAdapter>, DataGate, String) {
    let adapter = Arc::new(MemoryStorageAdapter::new());
    let gate = DataGate::new(adapter.clone(), DataGateConfig::default());
    let master = Caller::master();
    for user in ["u1", "u2"] {
        gate.create(
            "_User",
            as_map(json!({"objectId": user, "username": user})),
            &master,
        )
        .await
        .unwrap();
    }
    let team = gate
        .create(
            "Team",
            as_map(json!({
                "name": "crew",
                "members": {"__op": "AddRelation", "objects": [user_pointer("u1"), user_pointer("u2")]}
            })),
            &master,
        )
        .await
        .unwrap();
    let team_id = team
        .get("objectId")
        .and_then(Value::as_str)
        .unwrap()
        .to_string();
    (adapter, gate, team_id)
}

#[tokio::test]
async fn test_add_relation_materializes_join_rows() {
    let (adapter, _gate, _team_id) = setup().await;
    // The join collection name is part of the persisted-state contract.
    assert!(adapter.class_exists("_Join:members:Team").await.unwrap());
}

#[tokio::test]
async fn test_related_to_query_resolves_members() {
    let (_adapter, gate, team_id) = setup().await;
    let master = Caller::master();
    let found = gate
        .find(
            "_User",
            as_map(json!({"$relatedTo": {
                "object": {"__type": "Pointer", "className": "Team", "objectId": team_id},
                "key": "members"
            }})),
            FindOptions::default(),
            &master,
        )
        .await
        .unwrap();
    let mut usernames: Vec<&str> = found
        .iter()
        .filter_map(|u| u.get("username").and_then(Value::as_str))
        .collect();
    usernames.sort();
    assert_eq!(usernames, vec!["u1", "u2"]);
}

#[tokio::test]
async fn test_remove_relation_is_symmetric() {
    let (_adapter, gate, team_id) = setup().await;
    let master = Caller::master();
    gate.update(
        "Team",
        as_map(json!({"objectId": team_id})),
        as_map(json!({
            "members": {"__op": "RemoveRelation", "objects": [user_pointer("u1")]}
        })),
        UpdateOptions::default(),
        &master,
    )
    .await
    .unwrap();

    // After add then remove, teams owning u1 must not include this team.
    let owning = gate
        .find(
            "Team",
            as_map(json!({"members": user_pointer("u1")})),
            FindOptions::default(),
            &master,
        )
        .await
        .unwrap();
    assert!(owning.is_empty());
    let owning = gate
        .find(
            "Team",
            as_map(json!({"members": user_pointer("u2")})),
            FindOptions::default(),
            &master,
        )
        .await
        .unwrap();
    assert_eq!(owning.len(), 1);
}

#[tokio::test]
async fn test_remove_absent_relation_succeeds() {
    let (_adapter, gate, team_id) = setup().await;
    let master = Caller::master();
    // Removing an edge that was never added is tolerated as success.
    gate.update(
        "Team",
        as_map(json!({"objectId": team_id})),
        as_map(json!({
            "members": {"__op": "RemoveRelation", "objects": [user_pointer("ghost")]}
        })),
        UpdateOptions::default(),
        &master,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_relation_in_constraint_resolves_owners() {
    let (_adapter, gate, _team_id) = setup().await;
    let master = Caller::master();
    // A second team relating only u2.
    gate.create(
        "Team",
        as_map(json!({
            "name": "others",
            "members": {"__op": "AddRelation", "objects": [user_pointer("u2")]}
        })),
        &master,
    )
    .await
    .unwrap();

    let found = gate
        .find(
            "Team",
            as_map(json!({"members": {"$in": [user_pointer("u1")]}})),
            FindOptions::default(),
            &master,
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("name"), Some(&json!("crew")));

    let found = gate
        .find(
            "Team",
            as_map(json!({"members": {"$in": [user_pointer("u2")]}})),
            FindOptions::default(),
            &master,
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
}

#[tokio::test]
async fn test_relation_ne_constraint_excludes_owners() {
    let (_adapter, gate, _team_id) = setup().await;
    let master = Caller::master();
    gate.create("Team", as_map(json!({"name": "empty"})), &master)
        .await
        .unwrap();

    let found = gate
        .find(
            "Team",
            as_map(json!({"members": {"$ne": user_pointer("u1")}})),
            FindOptions::default(),
            &master,
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("name"), Some(&json!("empty")));
}

#[tokio::test]
async fn test_unrecognized_relation_constraint_matches_nothing() {
    let (_adapter, gate, _team_id) = setup().await;
    let master = Caller::master();
    let found = gate
        .find(
            "Team",
            as_map(json!({"members": {"$exists": true}})),
            FindOptions::default(),
            &master,
        )
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_batched_relation_ops_flatten() {
    let (_adapter, gate, team_id) = setup().await;
    let master = Caller::master();
    gate.update(
        "Team",
        as_map(json!({"objectId": team_id})),
        as_map(json!({"members": {"__op": "Batch", "ops": [
            {"__op": "RemoveRelation", "objects": [user_pointer("u1")]},
            {"__op": "AddRelation", "objects": [user_pointer("u1")]}
        ]}})),
        UpdateOptions::default(),
        &master,
    )
    .await
    .unwrap();
    // Both batched ops were extracted as relation edges; none of them may leak
    // into the stored row as an ordinary field.
    let found = gate
        .find(
            "Team",
            as_map(json!({"objectId": team_id})),
            FindOptions::default(),
            &master,
        )
        .await
        .unwrap();
    assert!(found[0].get("members").is_none());
}
