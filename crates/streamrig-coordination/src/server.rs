use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::debug;

use streamrig_proto::coordination::{
    self as proto, CreateRequest, CreateResponse, DeleteRequest, DeleteResponse,
    ExistsResponse, GetChildrenResponse, GetDataResponse, PathRequest, PingRequest,
    PingResponse, SetDataRequest, coordination_server::Coordination,
};

use crate::error::CoordinationError;
use crate::store::{Stat, ZNodeStore};

/// Server adapter that implements the Coordination gRPC service.
///
/// Converts tonic requests into [`ZNodeStore`] calls.
#[derive(Debug, Clone)]
pub struct CoordinationServer {
    store: Arc<dyn ZNodeStore>,
}

impl CoordinationServer {
    pub fn new(store: Arc<dyn ZNodeStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ZNodeStore> {
        &self.store
    }
}

#[tonic::async_trait]
impl Coordination for CoordinationServer {
    async fn create(
        &self,
        request: Request<CreateRequest>,
    ) -> Result<Response<CreateResponse>, Status> {
        let req = request.into_inner();
        debug!(path = %req.path, make_parents = req.make_parents, "create");
        let path = self
            .store
            .create(&req.path, req.data, req.make_parents)
            .map_err(coordination_error_to_status)?;
        Ok(Response::new(CreateResponse { path }))
    }

    async fn get_data(
        &self,
        request: Request<PathRequest>,
    ) -> Result<Response<GetDataResponse>, Status> {
        let req = request.into_inner();
        let (data, stat) = self
            .store
            .get_data(&req.path)
            .map_err(coordination_error_to_status)?;
        Ok(Response::new(GetDataResponse {
            data,
            stat: Some(stat_to_proto(stat)),
        }))
    }

    async fn set_data(
        &self,
        request: Request<SetDataRequest>,
    ) -> Result<Response<proto::Stat>, Status> {
        let req = request.into_inner();
        debug!(path = %req.path, expected_version = req.expected_version, "set_data");
        let stat = self
            .store
            .set_data(&req.path, req.data, req.expected_version)
            .map_err(coordination_error_to_status)?;
        Ok(Response::new(stat_to_proto(stat)))
    }

    async fn exists(
        &self,
        request: Request<PathRequest>,
    ) -> Result<Response<ExistsResponse>, Status> {
        let req = request.into_inner();
        let stat = self
            .store
            .exists(&req.path)
            .map_err(coordination_error_to_status)?;
        Ok(Response::new(ExistsResponse {
            stat: stat.map(stat_to_proto),
        }))
    }

    async fn get_children(
        &self,
        request: Request<PathRequest>,
    ) -> Result<Response<GetChildrenResponse>, Status> {
        let req = request.into_inner();
        let children = self
            .store
            .get_children(&req.path)
            .map_err(coordination_error_to_status)?;
        Ok(Response::new(GetChildrenResponse { children }))
    }

    async fn delete(
        &self,
        request: Request<DeleteRequest>,
    ) -> Result<Response<DeleteResponse>, Status> {
        let req = request.into_inner();
        debug!(path = %req.path, expected_version = req.expected_version, "delete");
        self.store
            .delete(&req.path, req.expected_version)
            .map_err(coordination_error_to_status)?;
        Ok(Response::new(DeleteResponse {}))
    }

    async fn ping(&self, _request: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        Ok(Response::new(PingResponse {
            node_count: self.store.node_count() as u64,
        }))
    }
}

pub(crate) fn stat_to_proto(stat: Stat) -> proto::Stat {
    proto::Stat {
        version: stat.version,
        ctime_ms: stat.ctime_ms,
        mtime_ms: stat.mtime_ms,
        num_children: stat.num_children,
    }
}

pub(crate) fn stat_from_proto(stat: proto::Stat) -> Stat {
    Stat {
        version: stat.version,
        ctime_ms: stat.ctime_ms,
        mtime_ms: stat.mtime_ms,
        num_children: stat.num_children,
    }
}

/// Metadata key carrying the current node version on a version mismatch.
pub(crate) const ACTUAL_VERSION_METADATA: &str = "x-actual-version";

/// Convert a CoordinationError to a tonic Status for gRPC responses.
fn coordination_error_to_status(error: CoordinationError) -> Status {
    match error {
        CoordinationError::NoNode { .. } => Status::not_found(error.to_string()),
        CoordinationError::NodeExists { .. } => Status::already_exists(error.to_string()),
        CoordinationError::BadVersion { actual, .. } => {
            let mut status = Status::aborted(error.to_string());
            status
                .metadata_mut()
                .insert(ACTUAL_VERSION_METADATA, actual.into());
            status
        }
        CoordinationError::NotEmpty { .. } => Status::failed_precondition(error.to_string()),
        CoordinationError::InvalidPath { .. } => Status::invalid_argument(error.to_string()),
        CoordinationError::Serialization { .. }
        | CoordinationError::Persistence { .. }
        | CoordinationError::Transport { .. } => Status::internal(error.to_string()),
    }
}
