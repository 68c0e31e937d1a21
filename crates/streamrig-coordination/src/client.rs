use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};

use streamrig_proto::CoordinationGrpcClient;
use streamrig_proto::coordination::{
    CreateRequest, DeleteRequest, PathRequest, PingRequest, SetDataRequest,
};

use crate::ANY_VERSION;
use crate::error::CoordinationError;
use crate::server::{ACTUAL_VERSION_METADATA, stat_from_proto};
use crate::store::Stat;

/// Default bound on establishing the connection.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(8);
/// Default bound on every request.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for a coordination service reachable at a `host:port` connect string.
///
/// Cloning is cheap; clones share the underlying channel.
#[derive(Debug, Clone)]
pub struct CoordinationClient {
    client: CoordinationGrpcClient<Channel>,
    connect_string: String,
}

impl CoordinationClient {
    /// Connect with the default connection and session timeouts.
    pub async fn connect(connect_string: &str) -> Result<Self, CoordinationError> {
        Self::connect_with_timeouts(
            connect_string,
            DEFAULT_CONNECTION_TIMEOUT,
            DEFAULT_SESSION_TIMEOUT,
        )
        .await
    }

    pub async fn connect_with_timeouts(
        connect_string: &str,
        connection_timeout: Duration,
        session_timeout: Duration,
    ) -> Result<Self, CoordinationError> {
        let endpoint = Endpoint::from_shared(format!("http://{connect_string}"))
            .map_err(|e| CoordinationError::from_transport_error(e, "Invalid connect string"))?
            .connect_timeout(connection_timeout)
            .timeout(session_timeout);

        let client = CoordinationGrpcClient::connect(endpoint)
            .await
            .map_err(|e| {
                CoordinationError::from_transport_error(
                    e,
                    &format!("Failed to connect to {connect_string}"),
                )
            })?;

        Ok(Self {
            client,
            connect_string: connect_string.to_string(),
        })
    }

    pub fn connect_string(&self) -> &str {
        &self.connect_string
    }

    pub async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        make_parents: bool,
    ) -> Result<String, CoordinationError> {
        let request = Request::new(CreateRequest {
            path: path.to_string(),
            data,
            make_parents,
        });
        let response = self
            .client
            .clone()
            .create(request)
            .await
            .map_err(|s| status_to_coordination_error(s, path, ANY_VERSION))?;
        Ok(response.into_inner().path)
    }

    pub async fn get_data(&self, path: &str) -> Result<(Vec<u8>, Stat), CoordinationError> {
        let response = self
            .client
            .clone()
            .get_data(path_request(path))
            .await
            .map_err(|s| status_to_coordination_error(s, path, ANY_VERSION))?
            .into_inner();
        Ok((
            response.data,
            response.stat.map(stat_from_proto).unwrap_or_default(),
        ))
    }

    pub async fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_version: i64,
    ) -> Result<Stat, CoordinationError> {
        let request = Request::new(SetDataRequest {
            path: path.to_string(),
            data,
            expected_version,
        });
        let response = self
            .client
            .clone()
            .set_data(request)
            .await
            .map_err(|s| status_to_coordination_error(s, path, expected_version))?;
        Ok(stat_from_proto(response.into_inner()))
    }

    pub async fn exists(&self, path: &str) -> Result<Option<Stat>, CoordinationError> {
        let response = self
            .client
            .clone()
            .exists(path_request(path))
            .await
            .map_err(|s| status_to_coordination_error(s, path, ANY_VERSION))?;
        Ok(response.into_inner().stat.map(stat_from_proto))
    }

    pub async fn get_children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        let response = self
            .client
            .clone()
            .get_children(path_request(path))
            .await
            .map_err(|s| status_to_coordination_error(s, path, ANY_VERSION))?;
        Ok(response.into_inner().children)
    }

    pub async fn delete(&self, path: &str, expected_version: i64) -> Result<(), CoordinationError> {
        let request = Request::new(DeleteRequest {
            path: path.to_string(),
            expected_version,
        });
        self.client
            .clone()
            .delete(request)
            .await
            .map_err(|s| status_to_coordination_error(s, path, expected_version))?;
        Ok(())
    }

    /// Round-trip readiness probe; returns the server's node count.
    pub async fn ping(&self) -> Result<u64, CoordinationError> {
        let response = self
            .client
            .clone()
            .ping(Request::new(PingRequest {}))
            .await
            .map_err(|s| status_to_coordination_error(s, "/", ANY_VERSION))?;
        Ok(response.into_inner().node_count)
    }

    /// Children of `path`, or nothing if `path` does not exist.
    pub async fn get_children_or_empty(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        match self.get_children(path).await {
            Ok(children) => Ok(children),
            Err(e) if e.is_no_node() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

fn path_request(path: &str) -> Request<PathRequest> {
    Request::new(PathRequest {
        path: path.to_string(),
    })
}

/// Convert a tonic Status back into the CoordinationError it was produced from.
fn status_to_coordination_error(
    status: Status,
    path: &str,
    expected_version: i64,
) -> CoordinationError {
    let path = path.to_string();
    match status.code() {
        Code::NotFound => CoordinationError::NoNode { path },
        Code::AlreadyExists => CoordinationError::NodeExists { path },
        Code::Aborted => {
            let actual = status
                .metadata()
                .get(ACTUAL_VERSION_METADATA)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(ANY_VERSION);
            CoordinationError::BadVersion {
                path,
                expected: expected_version,
                actual,
            }
        }
        Code::FailedPrecondition => CoordinationError::NotEmpty { path },
        Code::InvalidArgument => CoordinationError::InvalidPath {
            path,
            reason: status.message().to_string(),
        },
        _ => CoordinationError::from_transport_error(
            format!("{:?}: {}", status.code(), status.message()),
            "coordination request",
        ),
    }
}
