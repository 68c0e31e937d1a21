use std::sync::Arc;

use streamrig::types::{TopicConfigEntry, paths};
use streamrig::{AdminError, HarnessError, Properties, Record, TopicSpec};
use streamrig_broker::{AdminSession, BrokerError, RackAwareMode};
use streamrig_coordination::{CoordinationSession, ObjectStreamSerializer, StringSerializer};

use crate::test_utilities::start_cluster;

#[tokio::test]
async fn test_object_stream_serializer_is_rejected_before_connecting() {
    // Nothing listens here; the format check must fail first.
    let err = AdminSession::open("127.0.0.1:1", Arc::new(ObjectStreamSerializer))
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Configuration { ref key, .. } if key == "serializer"));
}

#[tokio::test]
async fn test_from_session_checks_the_format() {
    let cluster = start_cluster().await;
    let connect = cluster.coordination.connect_string();

    let framed = CoordinationSession::open(&connect, Arc::new(ObjectStreamSerializer))
        .await
        .unwrap();
    assert!(AdminSession::from_session(framed).is_err());

    let plain = CoordinationSession::open(&connect, Arc::new(StringSerializer))
        .await
        .unwrap();
    let admin = AdminSession::from_session(plain).unwrap();
    assert_eq!(admin.brokers().await.unwrap().len(), 1);
    admin.close();

    cluster.stop().await;
}

#[test_log::test(tokio::test)]
async fn test_topics_written_in_object_stream_format_are_never_served() {
    let cluster = start_cluster().await;
    let connect = cluster.coordination.connect_string();

    // Bypass the admin session and write the entries the way a misconfigured
    // client would.
    let framed = CoordinationSession::open(&connect, Arc::new(ObjectStreamSerializer))
        .await
        .unwrap();
    framed
        .write(&paths::topic("ghost"), r#"{"version":1,"partitions":{"0":[0]}}"#)
        .await
        .unwrap();
    framed.close();

    let admin = AdminSession::open(&connect, Arc::new(StringSerializer))
        .await
        .unwrap();
    assert!(admin.list_topics().await.unwrap().contains(&"ghost".to_string()));
    assert!(admin.topic_exists("ghost").await.unwrap());

    let client = cluster.broker.client().await.unwrap();
    let err = client.send("ghost", Record::from_value("x")).await.unwrap_err();
    assert!(matches!(err, BrokerError::TopicNotFound { .. }));
    let metadata = client.metadata(&[]).await.unwrap();
    assert!(metadata.topic("ghost").is_none());

    // The phantom also blocks re-creation under the same name.
    let err = admin
        .create_topic(&TopicSpec::new("ghost"), RackAwareMode::Enforced)
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Admin(_)));
    admin.close();

    cluster.stop().await;
}

#[tokio::test]
async fn test_create_topic_writes_config_and_assignment() {
    let cluster = start_cluster().await;
    let connect = cluster.coordination.connect_string();
    let admin = AdminSession::open(&connect, Arc::new(StringSerializer))
        .await
        .unwrap();

    let spec = TopicSpec::new("compacted")
        .partitions(2)
        .config(Properties::new().with("cleanup.policy", "compact"));
    let assignment = admin
        .create_topic(&spec, RackAwareMode::Enforced)
        .await
        .unwrap();
    assert_eq!(assignment.len(), 2);
    assert!(assignment.values().all(|replicas| replicas == &vec![0]));

    let session = CoordinationSession::open(&connect, Arc::new(StringSerializer))
        .await
        .unwrap();
    let config: TopicConfigEntry =
        serde_json::from_str(&session.read(&paths::topic_config("compacted")).await.unwrap())
            .unwrap();
    assert_eq!(config.config.get("cleanup.policy").map(String::as_str), Some("compact"));
    let raw_assignment = session.read(&paths::topic("compacted")).await.unwrap();
    assert_eq!(raw_assignment, r#"{"version":1,"partitions":{"0":[0],"1":[0]}}"#);

    admin.close();
    cluster.stop().await;
}

#[tokio::test]
async fn test_losing_create_leaves_the_winners_config() {
    let cluster = start_cluster().await;
    let connect = cluster.coordination.connect_string();
    let session = CoordinationSession::open(&connect, Arc::new(StringSerializer))
        .await
        .unwrap();

    // A create that has written its config but not yet its assignment.
    let winner = serde_json::to_string(&TopicConfigEntry::new(
        &Properties::new().with("cleanup.policy", "compact"),
    ))
    .unwrap();
    session
        .write(&paths::topic_config("raced"), &winner)
        .await
        .unwrap();

    let admin = AdminSession::open(&connect, Arc::new(StringSerializer))
        .await
        .unwrap();
    let spec = TopicSpec::new("raced").config(Properties::new().with("cleanup.policy", "delete"));
    let err = admin
        .create_topic(&spec, RackAwareMode::Enforced)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BrokerError::Admin(AdminError::TopicAlreadyExists { ref topic }) if topic == "raced"
    ));
    assert_eq!(
        session.read(&paths::topic_config("raced")).await.unwrap(),
        winner
    );
    assert!(!admin.topic_exists("raced").await.unwrap());

    admin.close();
    session.close();
    cluster.stop().await;
}

#[tokio::test]
async fn test_concurrent_creates_have_one_winner() {
    let cluster = start_cluster().await;
    let connect = cluster.coordination.connect_string();
    let first = AdminSession::open(&connect, Arc::new(StringSerializer))
        .await
        .unwrap();
    let second = AdminSession::open(&connect, Arc::new(StringSerializer))
        .await
        .unwrap();

    let compact = TopicSpec::new("contended").config(Properties::new().with("cleanup.policy", "compact"));
    let delete = TopicSpec::new("contended").config(Properties::new().with("cleanup.policy", "delete"));
    let (a, b) = tokio::join!(
        first.create_topic(&compact, RackAwareMode::Enforced),
        second.create_topic(&delete, RackAwareMode::Enforced),
    );
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    let expected = if a.is_ok() { "compact" } else { "delete" };

    let session = CoordinationSession::open(&connect, Arc::new(StringSerializer))
        .await
        .unwrap();
    let config: TopicConfigEntry =
        serde_json::from_str(&session.read(&paths::topic_config("contended")).await.unwrap())
            .unwrap();
    assert_eq!(config.config.get("cleanup.policy").map(String::as_str), Some(expected));

    first.close();
    second.close();
    session.close();
    cluster.stop().await;
}

#[tokio::test]
async fn test_colliding_topic_names_are_rejected() {
    let cluster = start_cluster().await;
    cluster.broker.create_topic("metrics_a").await.unwrap();

    let err = cluster.broker.create_topic("metrics.a").await.unwrap_err();
    assert!(err.is_administrative());

    cluster.stop().await;
}
