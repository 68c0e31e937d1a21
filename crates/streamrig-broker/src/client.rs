use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};

use streamrig::{AdminError, Record, StoredRecord};
use streamrig_proto::BrokerGrpcClient;
use streamrig_proto::broker::{
    CommitOffsetRequest, FetchOffsetRequest, FetchRequest, MetadataRequest, ProduceRequest,
};

use crate::error::BrokerError;
use crate::server::{
    ADMIN_ERROR_METADATA, ERROR_KIND_METADATA, HIGH_WATER_MARK_METADATA,
    MAX_RECORD_SIZE_METADATA, OFFSET_METADATA, RECORD_SIZE_METADATA, metadata_from_proto,
    record_to_proto, stored_from_proto,
};
use crate::types::{ClusterMetadata, FetchResult, ProduceResult};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Typed client for a broker reachable at a `host:port` bootstrap address.
///
/// Cloning is cheap; clones share the underlying channel.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    client: BrokerGrpcClient<Channel>,
    address: String,
}

impl BrokerClient {
    /// Connects to the first reachable address of a comma-separated broker list.
    pub async fn connect(broker_list: &str) -> Result<Self, BrokerError> {
        Self::connect_with_timeouts(broker_list, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    pub async fn connect_with_timeouts(
        broker_list: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let mut last_error = BrokerError::invalid_request("broker list is empty");
        for address in broker_list.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            let endpoint = Endpoint::from_shared(format!("http://{address}"))
                .map_err(|e| BrokerError::from_transport_error(e, "Invalid broker address"))?
                .connect_timeout(connect_timeout)
                .timeout(request_timeout);
            match BrokerGrpcClient::connect(endpoint).await {
                Ok(client) => {
                    return Ok(Self {
                        client,
                        address: address.to_string(),
                    });
                }
                Err(e) => {
                    last_error = BrokerError::from_transport_error(
                        e,
                        &format!("Failed to connect to {address}"),
                    );
                }
            }
        }
        Err(last_error)
    }

    /// Address of the broker this client is connected to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Appends `records` to `topic`. Without an explicit partition, the partition is
    /// chosen from the first record's key, or round-robin for a null key.
    pub async fn produce(
        &self,
        topic: &str,
        partition: Option<u32>,
        records: &[Record],
    ) -> Result<ProduceResult, BrokerError> {
        let response = self
            .client
            .clone()
            .produce(ProduceRequest {
                topic: topic.to_string(),
                partition,
                records: records.iter().map(record_to_proto).collect(),
            })
            .await
            .map_err(|status| status_to_broker_error(status, topic, partition.unwrap_or(0)))?
            .into_inner();
        Ok(ProduceResult {
            topic: response.topic,
            partition: response.partition,
            base_offset: response.base_offset,
            last_offset: response.last_offset,
        })
    }

    /// Produces a single record.
    pub async fn send(&self, topic: &str, record: Record) -> Result<ProduceResult, BrokerError> {
        self.produce(topic, None, std::slice::from_ref(&record)).await
    }

    pub async fn fetch(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
        max_records: u32,
    ) -> Result<FetchResult, BrokerError> {
        let response = self
            .client
            .clone()
            .fetch(FetchRequest {
                topic: topic.to_string(),
                partition,
                offset,
                max_records,
            })
            .await
            .map_err(|status| status_to_broker_error(status, topic, partition))?
            .into_inner();
        Ok(FetchResult {
            records: response.records.into_iter().map(stored_from_proto).collect(),
            high_water_mark: response.high_water_mark,
        })
    }

    /// Every record of a partition from `offset` up to the high water mark at the
    /// time of the first fetch.
    pub async fn fetch_all(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
    ) -> Result<Vec<StoredRecord>, BrokerError> {
        let first = self.fetch(topic, partition, offset, 0).await?;
        let end = first.high_water_mark;
        let mut records = first.records;
        let mut next = records.last().map_or(offset, |r| r.offset + 1);
        while next < end {
            let batch = self.fetch(topic, partition, next, 0).await?;
            let Some(last) = batch.records.last() else {
                break;
            };
            next = last.offset + 1;
            records.extend(batch.records);
        }
        records.retain(|r| r.offset < end);
        Ok(records)
    }

    /// Metadata for `topics`, or every served topic when empty.
    pub async fn metadata(&self, topics: &[&str]) -> Result<ClusterMetadata, BrokerError> {
        let response = self
            .client
            .clone()
            .metadata(MetadataRequest {
                topics: topics.iter().map(|t| t.to_string()).collect(),
            })
            .await
            .map_err(|status| status_to_broker_error(status, topics.first().copied().unwrap_or(""), 0))?
            .into_inner();
        Ok(metadata_from_proto(response))
    }

    pub async fn commit_offset(
        &self,
        group_id: &str,
        topic: &str,
        partition: u32,
        offset: u64,
    ) -> Result<u64, BrokerError> {
        let response = self
            .client
            .clone()
            .commit_offset(CommitOffsetRequest {
                group_id: group_id.to_string(),
                topic: topic.to_string(),
                partition,
                offset,
            })
            .await
            .map_err(|status| status_to_broker_error(status, topic, partition))?
            .into_inner();
        Ok(response.committed_offset)
    }

    pub async fn fetch_offset(
        &self,
        group_id: &str,
        topic: &str,
        partition: u32,
    ) -> Result<Option<u64>, BrokerError> {
        let response = self
            .client
            .clone()
            .fetch_offset(FetchOffsetRequest {
                group_id: group_id.to_string(),
                topic: topic.to_string(),
                partition,
            })
            .await
            .map_err(|status| status_to_broker_error(status, topic, partition))?
            .into_inner();
        Ok(response.offset)
    }
}

/// Convert a tonic Status back into a BrokerError for `topic`/`partition`.
fn status_to_broker_error(status: Status, topic: &str, partition: u32) -> BrokerError {
    let kind = status
        .metadata()
        .get(ERROR_KIND_METADATA)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let topic = topic.to_string();
    match (status.code(), kind.as_str()) {
        (Code::NotFound, "partition_not_found") => BrokerError::PartitionNotFound { topic, partition },
        (Code::NotFound, _) => BrokerError::TopicNotFound { topic },
        (Code::OutOfRange, _) => BrokerError::OffsetOutOfRange {
            topic,
            partition,
            offset: numeric_metadata(&status, OFFSET_METADATA).unwrap_or_default(),
            high_water_mark: numeric_metadata(&status, HIGH_WATER_MARK_METADATA).unwrap_or_default(),
        },
        (Code::InvalidArgument, "record_too_large") => {
            match (
                numeric_metadata(&status, RECORD_SIZE_METADATA),
                numeric_metadata(&status, MAX_RECORD_SIZE_METADATA),
            ) {
                (Some(size), Some(max)) => BrokerError::RecordTooLarge { topic, size, max },
                _ => BrokerError::invalid_request(status.message()),
            }
        }
        (Code::InvalidArgument | Code::AlreadyExists, "admin") => match admin_error(&status) {
            Some(admin) => BrokerError::Admin(admin),
            None => BrokerError::invalid_request(status.message()),
        },
        (Code::AlreadyExists, _) => BrokerError::Admin(AdminError::TopicAlreadyExists { topic }),
        (Code::InvalidArgument, _) => BrokerError::invalid_request(status.message()),
        _ => BrokerError::from_transport_error(
            format!("{:?}: {}", status.code(), status.message()),
            "broker request",
        ),
    }
}

fn numeric_metadata<T: std::str::FromStr>(status: &Status, key: &str) -> Option<T> {
    status
        .metadata()
        .get(key)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn admin_error(status: &Status) -> Option<AdminError> {
    let encoded = status.metadata().get_bin(ADMIN_ERROR_METADATA)?.to_bytes().ok()?;
    serde_json::from_slice(&encoded).ok()
}
