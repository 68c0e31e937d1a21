use std::net::TcpListener;

use streamrig::{HarnessError, ServiceState};
use streamrig_coordination::{ANY_VERSION, CoordinationError, CoordinationServiceEmbedded};

use crate::test_utilities::{start_service, start_service_with_client};

#[test_log::test(tokio::test)]
async fn test_connect_string_and_ping_after_start() {
    let (mut service, client) = start_service_with_client().await;

    assert_eq!(
        service.connect_string(),
        format!("127.0.0.1:{}", service.port())
    );
    assert_eq!(service.state(), ServiceState::Started);
    assert_eq!(client.ping().await.unwrap(), 1);

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_client_operations_over_grpc() {
    let (mut service, client) = start_service_with_client().await;

    client
        .create("/brokers/ids/0", b"{\"host\":\"127.0.0.1\"}".to_vec(), true)
        .await
        .unwrap();
    assert_eq!(client.get_children("/brokers").await.unwrap(), vec!["ids"]);
    assert_eq!(client.get_children("/brokers/ids").await.unwrap(), vec!["0"]);

    let err = client
        .create("/brokers/ids/0", Vec::new(), false)
        .await
        .unwrap_err();
    assert!(err.is_node_exists());

    let stat = client
        .set_data("/brokers/ids/0", b"updated".to_vec(), 0)
        .await
        .unwrap();
    assert_eq!(stat.version, 1);

    let err = client
        .set_data("/brokers/ids/0", b"stale".to_vec(), 0)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CoordinationError::BadVersion {
            path: "/brokers/ids/0".to_string(),
            expected: 0,
            actual: 1,
        }
    );

    let err = client.delete("/brokers", ANY_VERSION).await.unwrap_err();
    assert!(matches!(err, CoordinationError::NotEmpty { .. }));

    client.delete("/brokers/ids/0", ANY_VERSION).await.unwrap();
    assert!(client.exists("/brokers/ids/0").await.unwrap().is_none());
    assert!(client.get_data("/brokers/ids/0").await.unwrap_err().is_no_node());
    assert!(client.get_children_or_empty("/missing").await.unwrap().is_empty());

    let err = client.exists("relative/path").await.unwrap_err();
    assert!(matches!(err, CoordinationError::InvalidPath { .. }));

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_removes_data_dir() {
    let mut service = start_service().await;
    let data_dir = service.data_dir().unwrap().to_path_buf();
    assert!(data_dir.join("version-2").join("snapshot.json").exists());

    service.stop().await.unwrap();

    assert!(!data_dir.exists());
    assert!(service.data_dir().is_none());
    assert_eq!(service.state(), ServiceState::Stopped);
}

#[tokio::test]
async fn test_data_dirs_are_unique() {
    let mut a = start_service().await;
    let mut b = start_service().await;

    assert_ne!(a.data_dir(), b.data_dir());
    assert_ne!(a.port(), b.port());
    let name = a.data_dir().unwrap().file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("zookeeper-embedded-data-"));

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}

#[tokio::test]
async fn test_port_in_use_fails_with_port_bind() {
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let err = CoordinationServiceEmbedded::new(port).unwrap_err();
    assert!(err.is_port_bind(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn test_repeated_transitions_are_rejected() {
    let mut service = CoordinationServiceEmbedded::new(0).unwrap();

    let err = service.stop().await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::InvalidTransition {
            from: ServiceState::Created,
            ..
        }
    ));

    service.start().await.unwrap();
    let err = service.start().await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::InvalidTransition {
            from: ServiceState::Started,
            ..
        }
    ));

    service.stop().await.unwrap();
    let err = service.stop().await.unwrap_err();
    assert!(matches!(
        err,
        HarnessError::InvalidTransition {
            from: ServiceState::Stopped,
            ..
        }
    ));
    let err = service.start().await.unwrap_err();
    assert!(matches!(err, HarnessError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_port_is_closed_after_stop() {
    let mut service = start_service().await;
    let port = service.port();
    service.stop().await.unwrap();

    assert!(TcpListener::bind(("127.0.0.1", port)).is_ok());
}
