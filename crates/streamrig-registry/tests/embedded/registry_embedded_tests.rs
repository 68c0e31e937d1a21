use std::sync::Arc;

use serde_json::Value;
use streamrig::types::{TopicConfigEntry, paths};
use streamrig::{HarnessError, ServiceState};
use streamrig_coordination::{CoordinationServiceEmbedded, CoordinationSession, StringSerializer};
use streamrig_registry::{CompatibilityLevel, DEFAULT_STORAGE_TOPIC, RegistryEmbedded};

use crate::test_utilities::{get_json, register, start_backend, start_cluster, start_registry};

const SCHEMA: &str = r#"{"type":"record","name":"Click","fields":[{"name":"url","type":"string"}]}"#;

#[tokio::test]
async fn test_rest_connect_is_reachable_after_start() {
    let cluster = start_cluster().await;

    let port = cluster.registry.port();
    assert_ne!(port, 0);
    assert_eq!(cluster.registry.rest_connect(), format!("http://127.0.0.1:{port}"));
    assert_eq!(cluster.registry.state(), ServiceState::Started);

    let (status, _) = get_json(&cluster.url("/subjects")).await;
    assert_eq!(status, 200);

    cluster.stop().await;
}

#[tokio::test]
async fn test_storage_topic_is_created_compacted() {
    let cluster = start_cluster().await;

    let session = CoordinationSession::open(
        &cluster.coordination.connect_string(),
        Arc::new(StringSerializer),
    )
    .await
    .unwrap();
    let assignment = session.read(&paths::topic(DEFAULT_STORAGE_TOPIC)).await.unwrap();
    assert_eq!(assignment, r#"{"version":1,"partitions":{"0":[0]}}"#);
    let config: TopicConfigEntry = serde_json::from_str(
        &session
            .read(&paths::topic_config(DEFAULT_STORAGE_TOPIC))
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(config.config.get("cleanup.policy").map(String::as_str), Some("compact"));
    session.close();

    cluster.stop().await;
}

#[tokio::test]
async fn test_registrations_are_written_to_the_storage_topic() {
    let cluster = start_cluster().await;
    register(&cluster, "clicks-value", SCHEMA).await;

    let client = cluster.broker.client().await.unwrap();
    let records = client.fetch_all(DEFAULT_STORAGE_TOPIC, 0, 0).await.unwrap();
    assert_eq!(records.len(), 1);

    let key: Value = serde_json::from_slice(records[0].record.key.as_ref().unwrap()).unwrap();
    assert_eq!(key["keytype"], "SCHEMA");
    assert_eq!(key["subject"], "clicks-value");
    assert_eq!(key["version"], 1);
    let value: Value = serde_json::from_slice(&records[0].record.value).unwrap();
    assert_eq!(value["id"], 1);
    assert_eq!(value["schema"], SCHEMA);

    cluster.stop().await;
}

#[tokio::test]
async fn test_a_new_registry_replays_the_storage_topic() {
    let (mut coordination, mut broker) = start_backend().await;

    let mut first = start_registry(&coordination).await;
    let url = first.rest_connect();
    let response = reqwest::Client::new()
        .post(format!("{url}/subjects/clicks-value/versions"))
        .json(&serde_json::json!({ "schema": SCHEMA }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    first.stop().await.unwrap();

    let mut second = start_registry(&coordination).await;
    let (status, body) = get_json(&format!(
        "{}/subjects/clicks-value/versions/latest",
        second.rest_connect()
    ))
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["id"], 1);
    assert_eq!(body["schema"], SCHEMA);

    second.stop().await.unwrap();
    broker.stop().await.unwrap();
    coordination.stop().await.unwrap();
}

#[tokio::test]
async fn test_invalid_transitions_are_rejected() {
    let (mut coordination, mut broker) = start_backend().await;
    let mut registry = RegistryEmbedded::new(
        0,
        &coordination.connect_string(),
        DEFAULT_STORAGE_TOPIC,
        CompatibilityLevel::None,
    )
    .unwrap();

    let err = registry.stop().await.unwrap_err();
    assert!(matches!(err, HarnessError::InvalidTransition { .. }));

    registry.start().await.unwrap();
    let err = registry.start().await.unwrap_err();
    assert!(matches!(err, HarnessError::InvalidTransition { .. }));

    registry.stop().await.unwrap();
    assert_eq!(registry.state(), ServiceState::Stopped);
    assert!(registry.stop().await.is_err());

    broker.stop().await.unwrap();
    coordination.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_without_a_broker_fails() {
    let mut coordination = CoordinationServiceEmbedded::new(0).unwrap();
    coordination.start().await.unwrap();

    let mut registry = RegistryEmbedded::new(
        0,
        &coordination.connect_string(),
        DEFAULT_STORAGE_TOPIC,
        CompatibilityLevel::None,
    )
    .unwrap();
    let err = registry.start().await.unwrap_err();
    assert!(matches!(err, HarnessError::Unavailable { .. }));
    assert_eq!(registry.state(), ServiceState::Stopped);

    coordination.stop().await.unwrap();
}

#[test]
fn test_construction_validates_settings() {
    let err = RegistryEmbedded::new(0, "", DEFAULT_STORAGE_TOPIC, CompatibilityLevel::None)
        .unwrap_err();
    assert!(matches!(err, HarnessError::Configuration { .. }));

    let err = RegistryEmbedded::new(0, "127.0.0.1:2181", "bad topic", CompatibilityLevel::None)
        .unwrap_err();
    assert!(matches!(err, HarnessError::Configuration { ref key, .. } if key == "kafkastore.topic"));

    let registry =
        RegistryEmbedded::new(0, "127.0.0.1:2181", "_schemas", CompatibilityLevel::Full).unwrap();
    assert_eq!(registry.properties().get("kafkastore.topic"), Some("_schemas"));
    assert_eq!(
        registry.properties().get("schema.compatibility.level"),
        Some("FULL")
    );
    assert_eq!(registry.state(), ServiceState::Created);
}

#[tokio::test]
async fn test_configured_default_level_is_reported() {
    let (mut coordination, mut broker) = start_backend().await;
    let mut registry = RegistryEmbedded::new(
        0,
        &coordination.connect_string(),
        DEFAULT_STORAGE_TOPIC,
        CompatibilityLevel::Backward,
    )
    .unwrap();
    registry.start().await.unwrap();

    let (_, body) = get_json(&format!("{}/config", registry.rest_connect())).await;
    assert_eq!(body["compatibilityLevel"], "BACKWARD");

    registry.stop().await.unwrap();
    broker.stop().await.unwrap();
    coordination.stop().await.unwrap();
}
