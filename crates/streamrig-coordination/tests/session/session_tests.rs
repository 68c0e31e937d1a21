use std::sync::Arc;

use streamrig_coordination::{
    CoordinationSession, EntryFormat, EntrySerializer, ObjectStreamSerializer, StringSerializer,
};

use crate::test_utilities::start_service;

#[tokio::test]
async fn test_string_session_round_trip() {
    let mut service = start_service().await;
    let session = CoordinationSession::open(&service.connect_string(), Arc::new(StringSerializer))
        .await
        .unwrap();
    assert_eq!(session.format(), EntryFormat::Utf8);

    session
        .write("/config/topics/orders", r#"{"version":1,"config":{}}"#)
        .await
        .unwrap();
    assert!(session.exists("/config/topics/orders").await.unwrap());
    assert_eq!(
        session.read("/config/topics/orders").await.unwrap(),
        r#"{"version":1,"config":{}}"#
    );
    assert_eq!(session.children("/config/topics").await.unwrap(), vec!["orders"]);

    session
        .upsert("/config/topics/orders", r#"{"version":1,"config":{"a":"b"}}"#)
        .await
        .unwrap();
    let (value, stat) = session.read_with_stat("/config/topics/orders").await.unwrap();
    assert!(value.contains("\"a\":\"b\""));
    assert_eq!(stat.version, 1);

    session.delete("/config/topics/orders").await.unwrap();
    assert!(!session.exists("/config/topics/orders").await.unwrap());
    session.close();

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_object_stream_entries_are_unreadable_as_utf8() {
    let mut service = start_service().await;
    let connect = service.connect_string();

    let framed = CoordinationSession::open(&connect, Arc::new(ObjectStreamSerializer))
        .await
        .unwrap();
    framed
        .write("/brokers/topics/phantom", r#"{"version":1,"partitions":{"0":[0]}}"#)
        .await
        .unwrap();
    assert_eq!(
        framed.read("/brokers/topics/phantom").await.unwrap(),
        r#"{"version":1,"partitions":{"0":[0]}}"#
    );

    let plain = CoordinationSession::open(&connect, Arc::new(StringSerializer))
        .await
        .unwrap();
    assert!(plain.exists("/brokers/topics/phantom").await.unwrap());
    assert!(plain.read("/brokers/topics/phantom").await.is_err());

    let (raw, _) = plain.client().get_data("/brokers/topics/phantom").await.unwrap();
    assert_eq!(raw, ObjectStreamSerializer.serialize(r#"{"version":1,"partitions":{"0":[0]}}"#));

    service.stop().await.unwrap();
}
