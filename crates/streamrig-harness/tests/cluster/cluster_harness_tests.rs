use serde_json::json;
use streamrig::{HarnessError, Properties, Record, ServiceState, allocate_port};
use streamrig_broker::config::keys;
use streamrig_harness::{ClusterHarness, SCHEMA_REGISTRY_TOPIC};

use crate::test_utilities::{broker_client, owned_dirs, start_harness};

#[test_log::test(tokio::test)]
async fn test_end_to_end_single_record() {
    let mut harness = start_harness().await;

    let bootstrap = harness.bootstrap_servers();
    assert_eq!(
        bootstrap,
        format!("127.0.0.1:{}", harness.broker().port())
    );

    harness.create_topic_with("inputTopic", 1, 1).await.unwrap();
    let client = broker_client(&harness).await;
    let produced = client
        .send("inputTopic", Record::from_value("x"))
        .await
        .unwrap();
    assert_eq!(produced.base_offset, 0);

    let records = client.fetch_all("inputTopic", 0, 0).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].record.key, None);
    assert_eq!(records[0].record.value, b"x".to_vec());

    let dirs = owned_dirs(&harness);
    assert_eq!(dirs.len(), 2);
    assert!(dirs.iter().all(|dir| dir.is_dir()));

    harness.stop().await.unwrap();
    assert_eq!(harness.state(), ServiceState::Stopped);
    for dir in dirs {
        assert!(!dir.exists(), "{} survived stop", dir.display());
    }
}

#[tokio::test]
async fn test_accessors_describe_each_service() {
    let mut harness = start_harness().await;

    assert_eq!(harness.zookeeper_connect(), harness.coordination().connect_string());
    assert_eq!(harness.broker().zookeeper_connect(), harness.zookeeper_connect());
    assert_eq!(
        harness.schema_registry_url(),
        format!("http://127.0.0.1:{}", harness.registry().port())
    );
    assert_eq!(harness.registry().storage_topic(), SCHEMA_REGISTRY_TOPIC);

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_schema_registry_is_usable() {
    let mut harness = start_harness().await;
    let url = harness.schema_registry_url();

    let response = reqwest::Client::new()
        .post(format!("{url}/subjects/inputTopic-value/versions"))
        .json(&json!({ "schema": "\"string\"" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "id": 1 }));

    let config: serde_json::Value = reqwest::get(format!("{url}/config"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(config["compatibilityLevel"], "NONE");

    let client = broker_client(&harness).await;
    let metadata = client.metadata(&[]).await.unwrap();
    assert!(metadata.topic(SCHEMA_REGISTRY_TOPIC).is_some());

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_consecutive_harnesses_do_not_collide() {
    let mut first = start_harness().await;
    let mut second = start_harness().await;

    let first_ports = [
        first.coordination().port(),
        first.broker().port(),
        first.registry().port(),
    ];
    let second_ports = [
        second.coordination().port(),
        second.broker().port(),
        second.registry().port(),
    ];
    for port in second_ports {
        assert!(!first_ports.contains(&port));
    }
    for dir in owned_dirs(&second) {
        assert!(!owned_dirs(&first).contains(&dir));
    }

    // Same topic name in both clusters.
    first.create_topic("shared").await.unwrap();
    second.create_topic("shared").await.unwrap();

    second.stop().await.unwrap();
    first.stop().await.unwrap();
}

#[tokio::test]
async fn test_caller_overrides_win_except_log_dirs() {
    let port = allocate_port().unwrap();
    let overrides = Properties::new()
        .with(keys::PORT, port.to_string())
        .with(keys::NUM_PARTITIONS, "3")
        .with(keys::LOG_DIRS, "/nonexistent/streamrig-logs");
    let mut harness = ClusterHarness::start_with(&overrides).await.unwrap();

    assert_eq!(harness.bootstrap_servers(), format!("127.0.0.1:{port}"));
    assert_eq!(harness.broker().config().num_partitions, 3);
    assert_ne!(
        harness.broker().log_dir(),
        std::path::Path::new("/nonexistent/streamrig-logs")
    );

    // Auto-created topics pick up the overridden partition count.
    let client = broker_client(&harness).await;
    client.send("auto", Record::from_value("v")).await.unwrap();
    let metadata = client.metadata(&["auto"]).await.unwrap();
    assert_eq!(metadata.topic("auto").unwrap().partitions.len(), 3);

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_replication_beyond_broker_count_is_rejected() {
    let mut harness = start_harness().await;

    let err = harness
        .create_topic_with("replicated", 1, 2)
        .await
        .unwrap_err();
    assert!(err.is_administrative());

    harness.create_topic("once").await.unwrap();
    let err = harness.create_topic("once").await.unwrap_err();
    assert!(err.is_administrative());

    harness.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_start_reports_the_cause() {
    let overrides = Properties::new().with(keys::NUM_PARTITIONS, "many");
    let err = ClusterHarness::start_with(&overrides).await.unwrap_err();
    assert!(matches!(err, HarnessError::Configuration { ref key, .. } if key == keys::NUM_PARTITIONS));
}

#[tokio::test]
async fn test_second_stop_is_rejected() {
    let mut harness = start_harness().await;
    harness.stop().await.unwrap();

    let err = harness.stop().await.unwrap_err();
    assert!(matches!(err, HarnessError::InvalidTransition { .. }));
}
