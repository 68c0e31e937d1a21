use serde_json::json;

use crate::test_utilities::{get_json, register, start_cluster};

const USER_SCHEMA: &str =
    r#"{"type":"record","name":"User","fields":[{"name":"name","type":"string"}]}"#;
const ORDER_SCHEMA: &str =
    r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"long"}]}"#;

#[tokio::test]
async fn test_register_and_read_back() {
    let cluster = start_cluster().await;

    let (status, body) = register(&cluster, "users-value", USER_SCHEMA).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({ "id": 1 }));

    let (status, body) = get_json(&cluster.url("/subjects")).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!(["users-value"]));

    let (_, body) = get_json(&cluster.url("/subjects/users-value/versions")).await;
    assert_eq!(body, json!([1]));

    let (status, body) = get_json(&cluster.url("/subjects/users-value/versions/latest")).await;
    assert_eq!(status, 200);
    assert_eq!(body["subject"], "users-value");
    assert_eq!(body["version"], 1);
    assert_eq!(body["id"], 1);
    assert_eq!(body["schema"], USER_SCHEMA);

    let (_, body) = get_json(&cluster.url("/subjects/users-value/versions/1/schema")).await;
    assert_eq!(body["name"], "User");

    let (status, body) = get_json(&cluster.url("/schemas/ids/1")).await;
    assert_eq!(status, 200);
    assert_eq!(body["schema"], USER_SCHEMA);

    cluster.stop().await;
}

#[tokio::test]
async fn test_identical_schemas_share_ids() {
    let cluster = start_cluster().await;

    let (_, first) = register(&cluster, "users-value", USER_SCHEMA).await;
    // Whitespace differences do not make a different schema.
    let spaced = USER_SCHEMA.replace(',', ", ");
    let (_, again) = register(&cluster, "users-value", &spaced).await;
    assert_eq!(first, again);
    let (_, versions) = get_json(&cluster.url("/subjects/users-value/versions")).await;
    assert_eq!(versions, json!([1]));

    let (_, other_subject) = register(&cluster, "audit-value", USER_SCHEMA).await;
    assert_eq!(other_subject["id"], 1);

    let (_, order) = register(&cluster, "users-value", ORDER_SCHEMA).await;
    assert_eq!(order["id"], 2);
    let (_, versions) = get_json(&cluster.url("/subjects/users-value/versions")).await;
    assert_eq!(versions, json!([1, 2]));

    cluster.stop().await;
}

#[tokio::test]
async fn test_lookup_under_subject() {
    let cluster = start_cluster().await;
    register(&cluster, "users-value", USER_SCHEMA).await;

    let client = reqwest::Client::new();
    let response = client
        .post(cluster.url("/subjects/users-value"))
        .json(&json!({ "schema": USER_SCHEMA }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["version"], 1);
    assert_eq!(body["id"], 1);

    let response = client
        .post(cluster.url("/subjects/users-value"))
        .json(&json!({ "schema": ORDER_SCHEMA }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], 40403);

    cluster.stop().await;
}

#[tokio::test]
async fn test_error_codes() {
    let cluster = start_cluster().await;
    register(&cluster, "users-value", USER_SCHEMA).await;

    let (status, body) = get_json(&cluster.url("/subjects/missing/versions")).await;
    assert_eq!(status, 404);
    assert_eq!(body["error_code"], 40401);

    let (status, body) = get_json(&cluster.url("/subjects/users-value/versions/7")).await;
    assert_eq!(status, 404);
    assert_eq!(body["error_code"], 40402);

    let (status, body) = get_json(&cluster.url("/schemas/ids/99")).await;
    assert_eq!(status, 404);
    assert_eq!(body["error_code"], 40403);

    let (status, body) = get_json(&cluster.url("/subjects/users-value/versions/zero")).await;
    assert_eq!(status, 422);
    assert_eq!(body["error_code"], 42202);

    let (status, body) = register(&cluster, "users-value", "").await;
    assert_eq!(status, 422);
    assert_eq!(body["error_code"], 42201);

    let (status, body) = register(&cluster, "users-value", "{\"type\":").await;
    assert_eq!(status, 422);
    assert_eq!(body["error_code"], 42201);

    cluster.stop().await;
}

#[tokio::test]
async fn test_compatibility_config() {
    let cluster = start_cluster().await;
    let client = reqwest::Client::new();

    let (_, body) = get_json(&cluster.url("/config")).await;
    assert_eq!(body, json!({ "compatibilityLevel": "NONE" }));

    let response = client
        .put(cluster.url("/config/users-value"))
        .json(&json!({ "compatibility": "full" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "compatibility": "FULL" }));

    let (_, body) = get_json(&cluster.url("/config/users-value")).await;
    assert_eq!(body["compatibilityLevel"], "FULL");
    // Other subjects still follow the global level.
    let (_, body) = get_json(&cluster.url("/config/orders-value")).await;
    assert_eq!(body["compatibilityLevel"], "NONE");

    let response = client
        .put(cluster.url("/config"))
        .json(&json!({ "compatibility": "BACKWARD_TRANSITIVE" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let (_, body) = get_json(&cluster.url("/config/orders-value")).await;
    assert_eq!(body["compatibilityLevel"], "BACKWARD_TRANSITIVE");

    let response = client
        .put(cluster.url("/config"))
        .json(&json!({ "compatibility": "SIDEWAYS" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 422);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], 42203);

    cluster.stop().await;
}

#[tokio::test]
async fn test_delete_subject_keeps_ids_resolvable() {
    let cluster = start_cluster().await;
    register(&cluster, "users-value", USER_SCHEMA).await;
    register(&cluster, "users-value", ORDER_SCHEMA).await;

    let response = reqwest::Client::new()
        .delete(cluster.url("/subjects/users-value"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!([1, 2]));

    let (_, subjects) = get_json(&cluster.url("/subjects")).await;
    assert_eq!(subjects, json!([]));
    let (status, _) = get_json(&cluster.url("/subjects/users-value/versions")).await;
    assert_eq!(status, 404);
    let (status, _) = get_json(&cluster.url("/schemas/ids/2")).await;
    assert_eq!(status, 200);

    // Versions keep counting after a delete.
    let (_, body) = register(&cluster, "users-value", USER_SCHEMA).await;
    assert_eq!(body["id"], 1);
    let (_, versions) = get_json(&cluster.url("/subjects/users-value/versions")).await;
    assert_eq!(versions, json!([3]));

    cluster.stop().await;
}

#[tokio::test]
async fn test_root_and_schema_types() {
    let cluster = start_cluster().await;

    let (status, body) = get_json(&cluster.url("/")).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({}));

    let (_, body) = get_json(&cluster.url("/schemas/types")).await;
    assert_eq!(body, json!(["AVRO", "JSON"]));

    cluster.stop().await;
}
