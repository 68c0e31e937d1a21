use std::path::PathBuf;

use streamrig::types::paths;
use streamrig::{AdminError, HarnessError, Properties, Record, ServiceState};
use streamrig_broker::config::keys;
use streamrig_broker::{BrokerEmbedded, BrokerError};

use crate::test_utilities::{broker_overrides, start_cluster, start_cluster_with, start_coordination};

#[test_log::test(tokio::test)]
async fn test_broker_list_accepts_connections_right_after_start() {
    let cluster = start_cluster().await;

    assert_eq!(cluster.broker.state(), ServiceState::Started);
    assert_eq!(
        cluster.broker.broker_list(),
        format!("127.0.0.1:{}", cluster.broker.port())
    );
    tokio::net::TcpStream::connect(cluster.broker.broker_list())
        .await
        .expect("broker accepts connections without polling");

    cluster.stop().await;
}

#[tokio::test]
async fn test_registration_follows_lifecycle() {
    let mut cluster = start_cluster().await;
    let client = cluster.coordination_client().await;

    assert_eq!(client.get_children(paths::BROKER_IDS).await.unwrap(), vec!["0"]);
    assert!(client.exists(paths::CLUSTER_ID).await.unwrap().is_some());

    cluster.broker.stop().await.unwrap();
    assert!(client.get_children(paths::BROKER_IDS).await.unwrap().is_empty());
    cluster.coordination.stop().await.unwrap();
}

#[tokio::test]
async fn test_log_dir_is_forced_and_removed_on_stop() {
    let cluster = start_cluster_with(
        Properties::new().with(keys::LOG_DIRS, "/definitely/not/used"),
    )
    .await;

    let log_dir: PathBuf = cluster.broker.log_dir().to_path_buf();
    assert_ne!(log_dir, PathBuf::from("/definitely/not/used"));
    assert_eq!(
        cluster.broker.properties().get(keys::LOG_DIRS),
        Some(log_dir.to_str().unwrap())
    );
    assert!(
        log_dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("kafka-embedded-logs-dir-")
    );
    assert!(log_dir.is_dir());

    cluster.broker.create_topic("t").await.unwrap();
    assert!(log_dir.join("t-0").is_dir());

    cluster.stop().await;
    assert!(!log_dir.exists());
}

#[tokio::test]
async fn test_create_topic_is_listed_and_round_trips_records() {
    let cluster = start_cluster().await;
    let client = cluster.coordination_client().await;

    cluster.broker.create_topic_with("t", 1, 1).await.unwrap();
    let topics = client.get_children(paths::BROKER_TOPICS).await.unwrap();
    assert!(topics.contains(&"t".to_string()));

    let producer = cluster.broker.client().await.unwrap();
    let record = Record::new(Some(b"k".to_vec()), "value").with_header("trace", "1");
    let result = producer.send("t", record.clone()).await.unwrap();
    assert_eq!((result.partition, result.base_offset), (0, 0));

    let records = producer.fetch_all("t", 0, 0).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].record, record);
    assert_eq!(records[0].offset, 0);

    cluster.stop().await;
}

#[tokio::test]
async fn test_replication_factor_above_broker_count_is_administrative() {
    let cluster = start_cluster().await;

    let err = cluster.broker.create_topic_with("t", 1, 2).await.unwrap_err();
    assert!(err.is_administrative());
    assert_eq!(
        err,
        HarnessError::Administrative(AdminError::InvalidReplicationFactor {
            topic: "t".to_string(),
            requested: 2,
            available_brokers: 1,
        })
    );

    let client = cluster.coordination_client().await;
    assert!(client.exists(&paths::topic("t")).await.unwrap().is_none());
    cluster.stop().await;
}

#[tokio::test]
async fn test_create_topic_is_not_idempotent() {
    let cluster = start_cluster().await;

    cluster.broker.create_topic("t").await.unwrap();
    let err = cluster.broker.create_topic("t").await.unwrap_err();
    assert_eq!(
        err,
        HarnessError::Administrative(AdminError::TopicAlreadyExists {
            topic: "t".to_string()
        })
    );

    cluster.stop().await;
}

#[tokio::test]
async fn test_invalid_topic_name_and_config_are_rejected() {
    let cluster = start_cluster().await;

    let err = cluster.broker.create_topic("bad topic").await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Administrative(AdminError::InvalidTopicName { .. })
    ));

    let err = cluster
        .broker
        .create_topic_with_config("t", 1, 1, Properties::new().with("cleanup.policy", "archive"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Administrative(AdminError::InvalidConfig { ref key, .. }) if key == "cleanup.policy"
    ));

    let err = cluster.broker.create_topic_with("t", 0, 1).await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Administrative(AdminError::InvalidPartitions { partitions: 0, .. })
    ));

    cluster.stop().await;
}

#[tokio::test]
async fn test_invalid_lifecycle_transitions() {
    let mut coordination = start_coordination().await;
    let mut broker = BrokerEmbedded::new(&broker_overrides(&coordination)).unwrap();

    assert!(matches!(
        broker.stop().await.unwrap_err(),
        HarnessError::InvalidTransition { .. }
    ));
    broker.start().await.unwrap();
    assert!(matches!(
        broker.start().await.unwrap_err(),
        HarnessError::InvalidTransition { .. }
    ));
    broker.stop().await.unwrap();
    assert!(matches!(
        broker.stop().await.unwrap_err(),
        HarnessError::InvalidTransition { .. }
    ));
    assert!(broker.start().await.is_err());

    coordination.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_override_fails_construction() {
    let err = BrokerEmbedded::new(&Properties::new().with(keys::NUM_PARTITIONS, "many")).unwrap_err();
    assert!(matches!(err, HarnessError::Configuration { ref key, .. } if key == keys::NUM_PARTITIONS));
}

#[tokio::test]
async fn test_duplicate_broker_id_fails_start_and_cleans_up() {
    let cluster = start_cluster().await;

    let mut second = BrokerEmbedded::new(&broker_overrides(&cluster.coordination)).unwrap();
    let second_log_dir = second.log_dir().to_path_buf();
    let err = second.start().await.unwrap_err();
    assert!(matches!(err, HarnessError::Configuration { ref key, .. } if key == keys::BROKER_ID));
    assert_eq!(second.state(), ServiceState::Stopped);
    assert!(!second_log_dir.exists());

    cluster.stop().await;
}

#[tokio::test]
async fn test_auto_create_uses_broker_defaults() {
    let cluster = start_cluster_with(Properties::new().with(keys::NUM_PARTITIONS, "3")).await;
    let client = cluster.broker.client().await.unwrap();

    let result = client.send("auto", Record::from_value("x")).await.unwrap();
    assert!(result.partition < 3);

    let metadata = client.metadata(&[]).await.unwrap();
    let topic = metadata.topic("auto").expect("auto-created topic is served");
    assert_eq!(topic.partitions.len(), 3);
    assert!(topic.partitions.iter().all(|p| p.leader == 0 && p.replicas == vec![0]));
    assert_eq!(metadata.brokers.len(), 1);
    assert_eq!(metadata.brokers[0].address(), cluster.broker.broker_list());
    assert!(!metadata.cluster_id.is_empty());

    cluster.stop().await;
}

#[tokio::test]
async fn test_auto_create_can_be_disabled() {
    let cluster =
        start_cluster_with(Properties::new().with(keys::AUTO_CREATE_TOPICS_ENABLE, "false")).await;
    let client = cluster.broker.client().await.unwrap();

    let err = client.send("missing", Record::from_value("x")).await.unwrap_err();
    assert!(matches!(err, BrokerError::TopicNotFound { .. }));

    cluster.stop().await;
}

#[tokio::test]
async fn test_keyed_records_stay_on_one_partition() {
    let cluster = start_cluster().await;
    cluster.broker.create_topic_with("orders", 4, 1).await.unwrap();
    let client = cluster.broker.client().await.unwrap();

    let first = client
        .send("orders", Record::new(Some(b"user-7".to_vec()), "a"))
        .await
        .unwrap();
    for value in ["b", "c", "d"] {
        let next = client
            .send("orders", Record::new(Some(b"user-7".to_vec()), value))
            .await
            .unwrap();
        assert_eq!(next.partition, first.partition);
    }

    let explicit = client
        .produce("orders", Some(3), &[Record::from_value("z")])
        .await
        .unwrap();
    assert_eq!(explicit.partition, 3);

    let err = client
        .produce("orders", Some(9), &[Record::from_value("z")])
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::PartitionNotFound { partition: 9, .. }));

    cluster.stop().await;
}

#[tokio::test]
async fn test_fetch_bounds_and_group_offsets() {
    let cluster = start_cluster().await;
    cluster.broker.create_topic("t").await.unwrap();
    let client = cluster.broker.client().await.unwrap();

    let records: Vec<Record> = (0..5).map(|i| Record::from_value(format!("v{i}"))).collect();
    let result = client.produce("t", None, &records).await.unwrap();
    assert_eq!((result.base_offset, result.last_offset), (0, 4));

    let batch = client.fetch("t", 0, 1, 2).await.unwrap();
    assert_eq!(batch.high_water_mark, 5);
    assert_eq!(batch.records.len(), 2);
    assert_eq!(batch.records[0].record.value, b"v1");

    assert!(client.fetch("t", 0, 5, 10).await.unwrap().records.is_empty());
    let err = client.fetch("t", 0, 6, 10).await.unwrap_err();
    assert!(matches!(
        err,
        BrokerError::OffsetOutOfRange { offset: 6, high_water_mark: 5, .. }
    ));

    assert_eq!(client.fetch_offset("group", "t", 0).await.unwrap(), None);
    assert_eq!(client.commit_offset("group", "t", 0, 3).await.unwrap(), 3);
    assert_eq!(client.fetch_offset("group", "t", 0).await.unwrap(), Some(3));
    assert!(client.commit_offset("group", "t", 0, 99).await.is_err());

    cluster.stop().await;
}

#[tokio::test]
async fn test_topic_max_message_bytes_is_enforced() {
    let cluster = start_cluster().await;
    cluster
        .broker
        .create_topic_with_config("small", 1, 1, Properties::new().with("max.message.bytes", "8"))
        .await
        .unwrap();
    let client = cluster.broker.client().await.unwrap();

    client.send("small", Record::from_value("tiny")).await.unwrap();
    let err = client
        .send("small", Record::from_value("far too large for this topic"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BrokerError::RecordTooLarge {
            topic: "small".to_string(),
            size: 28,
            max: 8,
        }
    );

    cluster.stop().await;
}
