//! Schema lifecycle: implicit field addition, the GeoPoint limit, duplicate
//! classes, schema deletion and initialization.

use std::sync::Arc;

use datagate::{
    Caller, DataGate, DataGateConfig, DataGateError, FieldType, FindOptions, JsonMap,
    MemoryStorageAdapter, Schema, StorageAdapter,
};
use serde_json::{json, Value};

fn as_map(value: Value) -> JsonMap {
    value.as_object().cloned().unwrap()
}

fn gate() -> DataGate {
    DataGate::new(
        Arc::new(MemoryStorageAdapter::new()),
        DataGateConfig::default(),
    )
}

#[tokio::test]
async fn test_create_infers_schema_fields() {
    let gate = gate();
    let master = Caller::master();
    gate.create(
        "Game",
        as_map(json!({
            "title": "quest",
            "score": 10,
            "won": false,
            "tags": ["a"],
            "player": {"__type": "Pointer", "className": "_User", "objectId": "u1"}
        })),
        &master,
    )
    .await
    .unwrap();

    let schema = gate.schema().get_one_schema("Game", false).await.unwrap();
    assert_eq!(schema.expected_type("title"), Some(&FieldType::String));
    assert_eq!(schema.expected_type("score"), Some(&FieldType::Number));
    assert_eq!(schema.expected_type("won"), Some(&FieldType::Boolean));
    assert_eq!(schema.expected_type("tags"), Some(&FieldType::Array));
    assert_eq!(
        schema.expected_type("player"),
        Some(&FieldType::Pointer {
            target_class: "_User".to_string()
        })
    );
}

#[tokio::test]
async fn test_second_geo_point_field_rejected() {
    let gate = gate();
    let master = Caller::master();
    gate.create(
        "Place",
        as_map(json!({
            "location": {"__type": "GeoPoint", "latitude": 40.0, "longitude": -30.0}
        })),
        &master,
    )
    .await
    .unwrap();

    let result = gate
        .schema()
        .add_field_if_not_exists("Place", "altLocation", &FieldType::GeoPoint)
        .await;
    assert!(matches!(result, Err(DataGateError::IncorrectType(_))));

    // The same field again is a no-op success.
    gate.schema()
        .add_field_if_not_exists("Place", "location", &FieldType::GeoPoint)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_duplicate_class_rejected() {
    let gate = gate();
    gate.schema().add_class(&Schema::empty("Game")).await.unwrap();
    let result = gate.schema().add_class(&Schema::empty("Game")).await;
    assert!(matches!(result, Err(DataGateError::DuplicateValue(_))));
}

#[tokio::test]
async fn test_delete_schema_refuses_non_empty_class() {
    let gate = gate();
    let master = Caller::master();
    let created = gate
        .create("Game", as_map(json!({"score": 1})), &master)
        .await
        .unwrap();
    let result = gate.delete_schema("Game").await;
    assert!(matches!(result, Err(DataGateError::ClassNotEmpty(_))));

    let object_id = created.get("objectId").and_then(Value::as_str).unwrap();
    gate.destroy("Game", as_map(json!({"objectId": object_id})), &master)
        .await
        .unwrap();
    gate.delete_schema("Game").await.unwrap();
    assert!(matches!(
        gate.schema().get_one_schema("Game", false).await,
        Err(DataGateError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_schema_drops_join_collections() {
    let adapter = Arc::new(MemoryStorageAdapter::new());
    let gate = DataGate::new(adapter.clone(), DataGateConfig::default());
    let master = Caller::master();
    let team = gate
        .create(
            "Team",
            as_map(json!({"members": {"__op": "AddRelation", "objects": [
                {"__type": "Pointer", "className": "_User", "objectId": "u1"}]}})),
            &master,
        )
        .await
        .unwrap();
    assert!(adapter.class_exists("_Join:members:Team").await.unwrap());

    let object_id = team.get("objectId").and_then(Value::as_str).unwrap();
    gate.destroy("Team", as_map(json!({"objectId": object_id})), &master)
        .await
        .unwrap();
    gate.delete_schema("Team").await.unwrap();
    assert!(!adapter.class_exists("_Join:members:Team").await.unwrap());
}

#[tokio::test]
async fn test_initialization_enforces_unique_usernames() {
    let gate = gate();
    let master = Caller::master();
    gate.perform_initialization().await.unwrap();

    gate.create("_User", as_map(json!({"username": "kay"})), &master)
        .await
        .unwrap();
    let result = gate
        .create("_User", as_map(json!({"username": "kay"})), &master)
        .await;
    assert!(matches!(result, Err(DataGateError::DuplicateValue(_))));
}

#[tokio::test]
async fn test_missing_class_behaves_as_empty_on_reads() {
    let gate = gate();
    let master = Caller::master();
    let found = gate
        .find("Nowhere", JsonMap::new(), FindOptions::default(), &master)
        .await
        .unwrap();
    assert!(found.is_empty());
    assert_eq!(gate.count("Nowhere", JsonMap::new(), &master).await.unwrap(), 0);
}

#[tokio::test]
async fn test_add_field_survives_concurrent_addition() {
    // Two cache handles over one adapter simulate two server instances racing
    // on the same schema row; the guarded write keeps both successful.
    let adapter = Arc::new(MemoryStorageAdapter::new());
    let gate_a = DataGate::new(adapter.clone(), DataGateConfig::default());
    let gate_b = DataGate::new(adapter, DataGateConfig::default());

    gate_a
        .schema()
        .add_field_if_not_exists("Game", "score", &FieldType::Number)
        .await
        .unwrap();
    // The second instance re-reads the stored row and its guarded write
    // degrades to a no-op.
    gate_b
        .schema()
        .add_field_if_not_exists("Game", "score", &FieldType::Number)
        .await
        .unwrap();

    let schema = gate_a.schema().get_one_schema("Game", false).await.unwrap();
    assert_eq!(schema.expected_type("score"), Some(&FieldType::Number));
}
