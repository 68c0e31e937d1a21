use std::sync::Arc;
use std::time::Duration;

use streamrig::types::paths;
use streamrig::{Properties, TopicSpec};
use streamrig_broker::config::keys;
use streamrig_broker::{AdminSession, BrokerEmbedded, RackAwareMode};
use streamrig_coordination::{CoordinationSession, StringSerializer};

use crate::test_utilities::{broker_overrides, eventually, start_cluster_with, start_coordination};

#[tokio::test]
async fn test_background_sync_serves_topics_created_elsewhere() {
    let cluster = start_cluster_with(Properties::new().with(keys::TOPIC_SYNC_INTERVAL_MS, "20")).await;
    let admin = AdminSession::open(&cluster.coordination.connect_string(), Arc::new(StringSerializer))
        .await
        .unwrap();

    admin
        .create_topic(&TopicSpec::new("synced").partitions(2), RackAwareMode::Enforced)
        .await
        .unwrap();
    admin.close();

    let service = Arc::clone(cluster.broker.service().unwrap());
    let served = eventually(Duration::from_secs(5), || {
        service.registry().get("synced").is_some()
    })
    .await;
    assert!(served, "sync task never picked up the topic");
    assert!(cluster.broker.log_dir().join("synced-1").is_dir());

    drop(service);
    cluster.stop().await;
}

#[tokio::test]
async fn test_topics_registered_before_start_are_served_on_start() {
    let mut coordination = start_coordination().await;
    let session = CoordinationSession::open(&coordination.connect_string(), Arc::new(StringSerializer))
        .await
        .unwrap();
    session
        .write(&paths::topic("preexisting"), r#"{"version":1,"partitions":{"0":[0]}}"#)
        .await
        .unwrap();
    session.close();

    let mut broker = BrokerEmbedded::new(&broker_overrides(&coordination)).unwrap();
    broker.start().await.unwrap();

    let registry = broker.service().unwrap().registry();
    assert_eq!(registry.names(), vec!["preexisting".to_string()]);
    assert!(broker.log_dir().join("preexisting-0").is_dir());

    broker.stop().await.unwrap();
    coordination.stop().await.unwrap();
}
