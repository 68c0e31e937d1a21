//! Broker request handling, independent of the wire protocol.

use std::sync::Arc;

use dashmap::DashMap;
use streamrig::{AdminError, Record, TopicSpec};
use streamrig_coordination::CoordinationClient;
use tracing::instrument;

use crate::admin::{AdminSession, RackAwareMode};
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::topics::{TopicRegistry, TopicState};
use crate::types::{
    BrokerInfo, ClusterMetadata, FetchResult, PartitionMetadata, ProduceResult, TopicMetadata,
};
use crate::{debug, info};

type GroupOffsetKey = (String, String, u32);

#[derive(Debug)]
pub struct BrokerService {
    config: BrokerConfig,
    registry: Arc<TopicRegistry>,
    coordination: CoordinationClient,
    admin: AdminSession,
    offsets: DashMap<GroupOffsetKey, u64>,
    cluster_id: String,
}

impl BrokerService {
    pub fn new(
        config: BrokerConfig,
        registry: Arc<TopicRegistry>,
        coordination: CoordinationClient,
        cluster_id: String,
    ) -> Self {
        Self {
            config,
            registry,
            admin: AdminSession::from_client(coordination.clone()),
            coordination,
            offsets: DashMap::new(),
            cluster_id,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// The served topic, materializing it from the coordination service on first
    /// use. With `auto_create`, a topic with no entry at all is created using
    /// `num.partitions` and `default.replication.factor`. A topic whose entry does
    /// not decode is never created over.
    pub async fn ensure_topic(
        &self,
        name: &str,
        auto_create: bool,
    ) -> Result<Arc<TopicState>, BrokerError> {
        if let Some(state) = self.registry.get(name) {
            return Ok(state);
        }
        if let Some(state) = self.registry.sync_topic(&self.coordination, name).await? {
            return Ok(state);
        }
        let not_found = || BrokerError::TopicNotFound {
            topic: name.to_string(),
        };
        if self.registry.is_phantom(name) || !auto_create || !self.config.auto_create_topics {
            return Err(not_found());
        }

        let spec = TopicSpec::new(name)
            .partitions(self.config.num_partitions)
            .replication_factor(self.config.default_replication_factor);
        match self.admin.create_topic(&spec, RackAwareMode::Enforced).await {
            Ok(_) => info!("Auto-created topic '{name}'"),
            Err(BrokerError::Admin(AdminError::TopicAlreadyExists { .. })) => {
                debug!("Topic '{name}' was created concurrently");
            }
            Err(e) => return Err(e),
        }
        self.registry
            .sync_topic(&self.coordination, name)
            .await?
            .ok_or_else(not_found)
    }

    #[instrument(level = "debug", skip(self, records), fields(count = records.len()))]
    pub async fn produce(
        &self,
        topic: &str,
        partition: Option<u32>,
        records: Vec<Record>,
    ) -> Result<ProduceResult, BrokerError> {
        if topic.is_empty() {
            return Err(BrokerError::invalid_request("topic is required"));
        }
        if records.is_empty() {
            return Err(BrokerError::invalid_request("records must be non-empty"));
        }

        let state = self.ensure_topic(topic, true).await?;
        let max = state
            .max_message_bytes()
            .map_or(self.config.message_max_bytes, |limit| {
                limit.min(self.config.message_max_bytes)
            });
        if let Some(size) = records
            .iter()
            .map(Record::size_in_bytes)
            .find(|size| *size > max)
        {
            return Err(BrokerError::RecordTooLarge {
                topic: topic.to_string(),
                size,
                max,
            });
        }

        let key = records[0].key.as_deref();
        let partition = state.choose_partition(partition, key);
        let (base_offset, last_offset) = state.log(partition)?.lock().append(records)?;

        Ok(ProduceResult {
            topic: topic.to_string(),
            partition,
            base_offset,
            last_offset,
        })
    }

    pub async fn fetch(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
        max_records: usize,
    ) -> Result<FetchResult, BrokerError> {
        let state = self.ensure_topic(topic, false).await?;
        let log = state.log(partition)?.lock();
        Ok(FetchResult {
            records: log.read(offset, max_records)?,
            high_water_mark: log.high_water_mark(),
        })
    }

    /// Metadata for `topics`, or for every served topic when empty. Requested
    /// topics are auto-created like on produce.
    pub async fn metadata(&self, topics: &[String]) -> Result<ClusterMetadata, BrokerError> {
        let states = if topics.is_empty() {
            self.registry.sync_all(&self.coordination).await?;
            self.registry
                .names()
                .iter()
                .filter_map(|name| self.registry.get(name))
                .collect::<Vec<_>>()
        } else {
            let mut states = Vec::with_capacity(topics.len());
            for topic in topics {
                states.push(self.ensure_topic(topic, true).await?);
            }
            states
        };

        let brokers: Vec<BrokerInfo> = self
            .admin
            .brokers()
            .await?
            .into_iter()
            .map(|(broker_id, registration)| BrokerInfo {
                broker_id,
                host: registration.host,
                port: registration.port,
                rack: registration.rack,
            })
            .collect();
        let controller_id = brokers
            .iter()
            .map(|broker| broker.broker_id)
            .min()
            .unwrap_or(self.config.broker_id);

        let topics = states
            .iter()
            .map(|state| TopicMetadata {
                name: state.name().to_string(),
                partitions: (0..state.partition_count())
                    .map(|partition| {
                        let replicas = state.replicas(partition).to_vec();
                        PartitionMetadata {
                            partition,
                            leader: replicas.first().copied().unwrap_or(self.config.broker_id),
                            replicas,
                            high_water_mark: state
                                .log(partition)
                                .map(|log| log.lock().high_water_mark())
                                .unwrap_or(0),
                        }
                    })
                    .collect(),
            })
            .collect();

        Ok(ClusterMetadata {
            cluster_id: self.cluster_id.clone(),
            controller_id,
            brokers,
            topics,
        })
    }

    /// Stores the next offset `group_id` will read. It may not pass the high water mark.
    pub async fn commit_offset(
        &self,
        group_id: &str,
        topic: &str,
        partition: u32,
        offset: u64,
    ) -> Result<u64, BrokerError> {
        if group_id.is_empty() {
            return Err(BrokerError::invalid_request("group_id is required"));
        }
        let state = self.ensure_topic(topic, false).await?;
        let high_water_mark = state.log(partition)?.lock().high_water_mark();
        if offset > high_water_mark {
            return Err(BrokerError::OffsetOutOfRange {
                topic: topic.to_string(),
                partition,
                offset,
                high_water_mark,
            });
        }

        self.offsets
            .insert((group_id.to_string(), topic.to_string(), partition), offset);
        debug!("Group '{group_id}' committed {topic}-{partition}@{offset}");
        Ok(offset)
    }

    /// `None` until the group commits for this partition.
    pub fn fetch_offset(
        &self,
        group_id: &str,
        topic: &str,
        partition: u32,
    ) -> Result<Option<u64>, BrokerError> {
        if group_id.is_empty() {
            return Err(BrokerError::invalid_request("group_id is required"));
        }
        Ok(self
            .offsets
            .get(&(group_id.to_string(), topic.to_string(), partition))
            .map(|offset| *offset))
    }
}
