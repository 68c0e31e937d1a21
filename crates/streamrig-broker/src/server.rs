use std::collections::HashMap;
use std::sync::Arc;

use tonic::metadata::MetadataValue;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use streamrig::{AdminError, Record, StoredRecord};
use streamrig_proto::broker::{
    self as proto, CommitOffsetRequest, CommitOffsetResponse, FetchOffsetRequest,
    FetchOffsetResponse, FetchRequest, FetchResponse, MetadataRequest, MetadataResponse,
    ProduceRequest, ProduceResponse, broker_server::Broker,
};

use crate::error::BrokerError;
use crate::service::BrokerService;
use crate::types::{BrokerInfo, ClusterMetadata, PartitionMetadata, TopicMetadata};

/// Upper bound on records returned by one fetch.
pub const MAX_FETCH_RECORDS: u32 = 10_000;

/// Metadata key naming the [`BrokerError`] variant behind a failed call.
pub const ERROR_KIND_METADATA: &str = "x-broker-error";
/// Metadata key carrying the high water mark of an out-of-range request.
pub const HIGH_WATER_MARK_METADATA: &str = "x-high-water-mark";
/// Metadata key carrying the requested offset of an out-of-range request.
pub const OFFSET_METADATA: &str = "x-offset";
/// Metadata keys carrying the size and limit of a rejected record.
pub const RECORD_SIZE_METADATA: &str = "x-record-size";
pub const MAX_RECORD_SIZE_METADATA: &str = "x-max-record-size";
/// Binary metadata key carrying an [`AdminError`] as JSON.
pub const ADMIN_ERROR_METADATA: &str = "x-admin-error-bin";

/// Server adapter that implements the Broker gRPC service.
#[derive(Debug, Clone)]
pub struct BrokerServer {
    service: Arc<BrokerService>,
}

impl BrokerServer {
    pub fn new(service: Arc<BrokerService>) -> Self {
        Self { service }
    }
}

pub(crate) fn record_from_proto(record: proto::Record) -> Record {
    Record {
        key: record.key,
        value: record.value,
        headers: record.headers.into_iter().collect(),
    }
}

pub(crate) fn record_to_proto(record: &Record) -> proto::Record {
    proto::Record {
        key: record.key.clone(),
        value: record.value.clone(),
        headers: record
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

pub(crate) fn stored_to_proto(stored: &StoredRecord) -> proto::RecordWithOffset {
    proto::RecordWithOffset {
        record: Some(record_to_proto(&stored.record)),
        offset: stored.offset,
        timestamp_ms: stored.timestamp_ms,
    }
}

pub(crate) fn stored_from_proto(stored: proto::RecordWithOffset) -> StoredRecord {
    StoredRecord {
        record: stored
            .record
            .map(record_from_proto)
            .unwrap_or_else(|| Record {
                key: None,
                value: Vec::new(),
                headers: HashMap::new(),
            }),
        offset: stored.offset,
        timestamp_ms: stored.timestamp_ms,
    }
}

fn metadata_to_proto(metadata: ClusterMetadata) -> MetadataResponse {
    MetadataResponse {
        cluster_id: metadata.cluster_id,
        controller_id: metadata.controller_id,
        brokers: metadata
            .brokers
            .into_iter()
            .map(|broker| proto::BrokerInfo {
                broker_id: broker.broker_id,
                host: broker.host,
                port: u32::from(broker.port),
                rack: broker.rack,
            })
            .collect(),
        topics: metadata
            .topics
            .into_iter()
            .map(|topic| proto::TopicMetadata {
                name: topic.name,
                partitions: topic
                    .partitions
                    .into_iter()
                    .map(|p| proto::PartitionMetadata {
                        partition: p.partition,
                        leader: p.leader,
                        replicas: p.replicas,
                        high_water_mark: p.high_water_mark,
                    })
                    .collect(),
            })
            .collect(),
    }
}

pub(crate) fn metadata_from_proto(response: MetadataResponse) -> ClusterMetadata {
    ClusterMetadata {
        cluster_id: response.cluster_id,
        controller_id: response.controller_id,
        brokers: response
            .brokers
            .into_iter()
            .map(|broker| BrokerInfo {
                broker_id: broker.broker_id,
                host: broker.host,
                port: u16::try_from(broker.port).unwrap_or_default(),
                rack: broker.rack,
            })
            .collect(),
        topics: response
            .topics
            .into_iter()
            .map(|topic| TopicMetadata {
                name: topic.name,
                partitions: topic
                    .partitions
                    .into_iter()
                    .map(|p| PartitionMetadata {
                        partition: p.partition,
                        leader: p.leader,
                        replicas: p.replicas,
                        high_water_mark: p.high_water_mark,
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn with_kind(mut status: Status, kind: &'static str) -> Status {
    status
        .metadata_mut()
        .insert(ERROR_KIND_METADATA, MetadataValue::from_static(kind));
    status
}

fn with_admin_error(mut status: Status, admin: &AdminError) -> Status {
    match serde_json::to_vec(admin) {
        Ok(encoded) => {
            status
                .metadata_mut()
                .insert_bin(ADMIN_ERROR_METADATA, MetadataValue::from_bytes(&encoded));
        }
        Err(e) => warn!("Could not encode admin error for transport: {e}"),
    }
    status
}

/// Convert a BrokerError to the gRPC Status a client can map back.
pub fn broker_error_to_status(err: BrokerError) -> Status {
    match &err {
        BrokerError::TopicNotFound { .. } => {
            with_kind(Status::not_found(err.to_string()), "topic_not_found")
        }
        BrokerError::PartitionNotFound { .. } => {
            with_kind(Status::not_found(err.to_string()), "partition_not_found")
        }
        BrokerError::OffsetOutOfRange {
            offset,
            high_water_mark,
            ..
        } => {
            let mut status = with_kind(Status::out_of_range(err.to_string()), "offset_out_of_range");
            let metadata = status.metadata_mut();
            metadata.insert(OFFSET_METADATA, (*offset).into());
            metadata.insert(HIGH_WATER_MARK_METADATA, (*high_water_mark).into());
            status
        }
        BrokerError::RecordTooLarge { size, max, .. } => {
            let mut status = with_kind(Status::invalid_argument(err.to_string()), "record_too_large");
            let metadata = status.metadata_mut();
            metadata.insert(RECORD_SIZE_METADATA, (*size as u64).into());
            metadata.insert(MAX_RECORD_SIZE_METADATA, (*max as u64).into());
            status
        }
        BrokerError::InvalidRequest { .. } => Status::invalid_argument(err.to_string()),
        BrokerError::Admin(admin) => {
            let status = match admin {
                AdminError::TopicAlreadyExists { .. } => Status::already_exists(err.to_string()),
                _ => Status::invalid_argument(err.to_string()),
            };
            with_admin_error(with_kind(status, "admin"), admin)
        }
        BrokerError::Coordination(_) | BrokerError::Transport { .. } => {
            Status::unavailable(err.to_string())
        }
        BrokerError::Storage { .. } => Status::internal(err.to_string()),
    }
}

#[tonic::async_trait]
impl Broker for BrokerServer {
    async fn produce(
        &self,
        request: Request<ProduceRequest>,
    ) -> Result<Response<ProduceResponse>, Status> {
        let req = request.into_inner();
        debug!(topic = %req.topic, partition = ?req.partition, count = req.records.len(), "produce");
        let records = req.records.into_iter().map(record_from_proto).collect();
        let result = self
            .service
            .produce(&req.topic, req.partition, records)
            .await
            .map_err(broker_error_to_status)?;
        Ok(Response::new(ProduceResponse {
            topic: result.topic,
            partition: result.partition,
            base_offset: result.base_offset,
            last_offset: result.last_offset,
        }))
    }

    async fn fetch(
        &self,
        request: Request<FetchRequest>,
    ) -> Result<Response<FetchResponse>, Status> {
        let req = request.into_inner();
        debug!(topic = %req.topic, partition = req.partition, offset = req.offset, "fetch");
        let max_records = match req.max_records {
            0 => MAX_FETCH_RECORDS,
            n => n.min(MAX_FETCH_RECORDS),
        };
        let result = self
            .service
            .fetch(&req.topic, req.partition, req.offset, max_records as usize)
            .await
            .map_err(broker_error_to_status)?;
        Ok(Response::new(FetchResponse {
            records: result.records.iter().map(stored_to_proto).collect(),
            high_water_mark: result.high_water_mark,
        }))
    }

    async fn metadata(
        &self,
        request: Request<MetadataRequest>,
    ) -> Result<Response<MetadataResponse>, Status> {
        let req = request.into_inner();
        let metadata = self
            .service
            .metadata(&req.topics)
            .await
            .map_err(broker_error_to_status)?;
        Ok(Response::new(metadata_to_proto(metadata)))
    }

    async fn commit_offset(
        &self,
        request: Request<CommitOffsetRequest>,
    ) -> Result<Response<CommitOffsetResponse>, Status> {
        let req = request.into_inner();
        let committed_offset = self
            .service
            .commit_offset(&req.group_id, &req.topic, req.partition, req.offset)
            .await
            .map_err(broker_error_to_status)?;
        Ok(Response::new(CommitOffsetResponse { committed_offset }))
    }

    async fn fetch_offset(
        &self,
        request: Request<FetchOffsetRequest>,
    ) -> Result<Response<FetchOffsetResponse>, Status> {
        let req = request.into_inner();
        let offset = self
            .service
            .fetch_offset(&req.group_id, &req.topic, req.partition)
            .map_err(broker_error_to_status)?;
        Ok(Response::new(FetchOffsetResponse { offset }))
    }
}
