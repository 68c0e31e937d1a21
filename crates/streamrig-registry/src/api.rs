//! Confluent-compatible REST API of the embedded schema registry.
//!
//! - `GET /subjects` lists subjects with live versions
//! - `GET|POST /subjects/{subject}/versions` lists versions or registers a schema
//! - `GET /subjects/{subject}/versions/{version}` returns one version (`latest` allowed)
//! - `GET /subjects/{subject}/versions/{version}/schema` returns the raw schema
//! - `POST /subjects/{subject}` looks a schema up under a subject
//! - `DELETE /subjects/{subject}` soft-deletes a subject
//! - `GET /schemas/ids/{id}` returns a schema by global id
//! - `GET /schemas/types` lists accepted schema types
//! - `GET|PUT /config` and `GET|PUT /config/{subject}` manage compatibility levels

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::compatibility::CompatibilityLevel;
use crate::error::SchemaError;
use crate::store::SchemaStore;
use crate::{error, warn};

pub const CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

const SCHEMA_TYPES: [&str; 2] = ["AVRO", "JSON"];

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<SchemaStore>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error_code: u32,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSchemaRequest {
    pub schema: String,
    #[serde(default)]
    pub schema_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterSchemaResponse {
    pub id: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SchemaByIdResponse {
    pub schema: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigResponse {
    #[serde(rename = "compatibilityLevel")]
    pub compatibility_level: CompatibilityLevel,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub compatibility: String,
}

impl IntoResponse for SchemaError {
    fn into_response(self) -> Response {
        let error_code = self.error_code();
        let status = match error_code / 100 {
            404 => StatusCode::NOT_FOUND,
            422 => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Schema registry request failed: {}", self);
        } else {
            warn!("Schema registry request rejected: {}", self);
        }
        let body = ErrorBody {
            error_code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/subjects", get(list_subjects))
        .route(
            "/subjects/{subject}",
            post(lookup_schema).delete(delete_subject),
        )
        .route(
            "/subjects/{subject}/versions",
            get(list_versions).post(register_schema),
        )
        .route("/subjects/{subject}/versions/{version}", get(get_version))
        .route(
            "/subjects/{subject}/versions/{version}/schema",
            get(get_raw_schema),
        )
        .route("/schemas/ids/{id}", get(get_schema_by_id))
        .route("/schemas/types", get(schema_types))
        .route("/config", get(get_global_config).put(set_global_config))
        .route(
            "/config/{subject}",
            get(get_subject_config).put(set_subject_config),
        )
        .with_state(state)
}

async fn root() -> Response {
    (StatusCode::OK, Json(serde_json::json!({}))).into_response()
}

async fn list_subjects(State(state): State<ApiState>) -> Response {
    (StatusCode::OK, Json(state.store.subjects())).into_response()
}

async fn list_versions(State(state): State<ApiState>, Path(subject): Path<String>) -> Response {
    match state.store.versions(&subject) {
        Ok(versions) => (StatusCode::OK, Json(versions)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn register_schema(
    State(state): State<ApiState>,
    Path(subject): Path<String>,
    Json(request): Json<RegisterSchemaRequest>,
) -> Response {
    if let Err(e) = check_schema_type(request.schema_type.as_deref()) {
        return e.into_response();
    }
    match state.store.register(&subject, &request.schema).await {
        Ok(id) => (StatusCode::OK, Json(RegisterSchemaResponse { id })).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_version(
    State(state): State<ApiState>,
    Path((subject, version)): Path<(String, String)>,
) -> Response {
    match state.store.version(&subject, &version) {
        Ok(found) => (StatusCode::OK, Json(found)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// The schema text itself is the body.
async fn get_raw_schema(
    State(state): State<ApiState>,
    Path((subject, version)): Path<(String, String)>,
) -> Response {
    match state.store.version(&subject, &version) {
        Ok(found) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, CONTENT_TYPE)],
            found.schema,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn lookup_schema(
    State(state): State<ApiState>,
    Path(subject): Path<String>,
    Json(request): Json<RegisterSchemaRequest>,
) -> Response {
    match state.store.lookup(&subject, &request.schema) {
        Ok(found) => (StatusCode::OK, Json(found)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn delete_subject(State(state): State<ApiState>, Path(subject): Path<String>) -> Response {
    match state.store.delete_subject(&subject).await {
        Ok(versions) => (StatusCode::OK, Json(versions)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_schema_by_id(State(state): State<ApiState>, Path(id): Path<i32>) -> Response {
    match state.store.schema_by_id(id) {
        Ok(schema) => (StatusCode::OK, Json(SchemaByIdResponse { schema })).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn schema_types() -> Response {
    (StatusCode::OK, Json(SCHEMA_TYPES)).into_response()
}

async fn get_global_config(State(state): State<ApiState>) -> Response {
    let body = ConfigResponse {
        compatibility_level: state.store.global_level(),
    };
    (StatusCode::OK, Json(body)).into_response()
}

async fn set_global_config(
    State(state): State<ApiState>,
    Json(update): Json<ConfigUpdate>,
) -> Response {
    let level = match update.compatibility.parse::<CompatibilityLevel>() {
        Ok(level) => level,
        Err(e) => return e.into_response(),
    };
    match state.store.set_global_level(level).await {
        Ok(()) => (StatusCode::OK, Json(ConfigUpdate::from(level))).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_subject_config(
    State(state): State<ApiState>,
    Path(subject): Path<String>,
) -> Response {
    let body = ConfigResponse {
        compatibility_level: state.store.subject_level(&subject),
    };
    (StatusCode::OK, Json(body)).into_response()
}

async fn set_subject_config(
    State(state): State<ApiState>,
    Path(subject): Path<String>,
    Json(update): Json<ConfigUpdate>,
) -> Response {
    let level = match update.compatibility.parse::<CompatibilityLevel>() {
        Ok(level) => level,
        Err(e) => return e.into_response(),
    };
    match state.store.set_subject_level(&subject, level).await {
        Ok(()) => (StatusCode::OK, Json(ConfigUpdate::from(level))).into_response(),
        Err(e) => e.into_response(),
    }
}

impl From<CompatibilityLevel> for ConfigUpdate {
    fn from(level: CompatibilityLevel) -> Self {
        Self {
            compatibility: level.to_string(),
        }
    }
}

fn check_schema_type(schema_type: Option<&str>) -> Result<(), SchemaError> {
    match schema_type {
        None => Ok(()),
        Some(t) if SCHEMA_TYPES.iter().any(|known| known.eq_ignore_ascii_case(t)) => Ok(()),
        Some(t) => Err(SchemaError::invalid_schema(format!(
            "Unsupported schema type '{t}'"
        ))),
    }
}
