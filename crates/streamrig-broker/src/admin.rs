//! Topic administration through the coordination service.
//!
//! Creating a topic writes its config to `/config/topics/<topic>` and its replica
//! assignment to `/brokers/topics/<topic>`. Brokers pick the assignment up and
//! create the partition logs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use streamrig::types::{BrokerRegistration, TopicAssignment, TopicConfigEntry, paths};
use streamrig::{AdminError, HarnessError, Properties, TopicSpec};
use streamrig_coordination::client::{DEFAULT_CONNECTION_TIMEOUT, DEFAULT_SESSION_TIMEOUT};
use streamrig_coordination::{
    CoordinationClient, CoordinationSession, EntryFormat, EntrySerializer, StringSerializer,
};
use tracing::instrument;

use crate::error::BrokerError;
use crate::partitioner::{murmur2, to_positive};
use crate::{debug, info, warn};

pub const MAX_TOPIC_NAME_LENGTH: usize = 249;

/// How broker racks influence replica placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RackAwareMode {
    /// Racks are ignored.
    Disabled,
    /// Racks must be set on all brokers or on none; replicas alternate racks.
    #[default]
    Enforced,
    /// Racks are used when every broker has one, ignored otherwise.
    Safe,
}

/// A broker as seen by replica assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMetadata {
    pub id: i32,
    pub rack: Option<String>,
}

/// Short-lived administrative connection to the coordination service.
#[derive(Debug)]
pub struct AdminSession {
    session: CoordinationSession,
}

impl AdminSession {
    /// Opens a session whose entries brokers can read. A serializer producing any
    /// other format is rejected with `Configuration` before connecting.
    pub async fn open(
        connect_string: &str,
        serializer: Arc<dyn EntrySerializer>,
    ) -> Result<Self, HarnessError> {
        Self::open_with_timeouts(
            connect_string,
            DEFAULT_SESSION_TIMEOUT,
            DEFAULT_CONNECTION_TIMEOUT,
            serializer,
        )
        .await
    }

    pub async fn open_with_timeouts(
        connect_string: &str,
        session_timeout: Duration,
        connection_timeout: Duration,
        serializer: Arc<dyn EntrySerializer>,
    ) -> Result<Self, HarnessError> {
        check_format(serializer.format())?;
        let session = CoordinationSession::open_with_timeouts(
            connect_string,
            session_timeout,
            connection_timeout,
            serializer,
        )
        .await?;
        Ok(Self { session })
    }

    /// Wraps an existing session after checking its entry format.
    pub fn from_session(session: CoordinationSession) -> Result<Self, HarnessError> {
        check_format(session.format())?;
        Ok(Self { session })
    }

    /// Wraps an already connected client, writing plain UTF-8 entries.
    pub fn from_client(client: CoordinationClient) -> Self {
        Self {
            session: CoordinationSession::from_client(client, Arc::new(StringSerializer)),
        }
    }

    /// Validates `spec`, assigns replicas to the registered brokers, and writes the
    /// topic config and assignment. Not idempotent.
    #[instrument(skip(self, spec), fields(topic = %spec.name))]
    pub async fn create_topic(
        &self,
        spec: &TopicSpec,
        mode: RackAwareMode,
    ) -> Result<BTreeMap<u32, Vec<i32>>, BrokerError> {
        validate_topic_name(&spec.name)?;
        if spec.partitions < 1 {
            return Err(AdminError::InvalidPartitions {
                topic: spec.name.clone(),
                partitions: spec.partitions,
            }
            .into());
        }
        if spec.replication_factor < 1 {
            return Err(AdminError::InvalidReplicationFactor {
                topic: spec.name.clone(),
                requested: spec.replication_factor,
                available_brokers: 0,
            }
            .into());
        }
        validate_topic_config(&spec.config)?;

        let existing = self.list_topics().await?;
        if existing.iter().any(|topic| topic == &spec.name) {
            return Err(AdminError::TopicAlreadyExists {
                topic: spec.name.clone(),
            }
            .into());
        }
        check_collision(&spec.name, &existing)?;

        let brokers = self.brokers().await?;
        let metadata: Vec<BrokerMetadata> = brokers
            .iter()
            .map(|(id, registration)| BrokerMetadata {
                id: *id,
                rack: registration.rack.clone(),
            })
            .collect();
        let assignment = assign_replicas(
            &spec.name,
            &metadata,
            spec.partitions,
            spec.replication_factor,
            mode,
        )?;

        let already_exists = || -> BrokerError {
            AdminError::TopicAlreadyExists {
                topic: spec.name.clone(),
            }
            .into()
        };

        // Both entries are create-only so a concurrent create of the same topic
        // fails before touching what the winner wrote.
        let config_entry = serde_json::to_string(&TopicConfigEntry::new(&spec.config))
            .map_err(|e| BrokerError::from_serialization_error(e, "encode topic config"))?;
        match self
            .session
            .write(&paths::topic_config(&spec.name), &config_entry)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_node_exists() => return Err(already_exists()),
            Err(e) => return Err(e.into()),
        }

        let assignment_entry = serde_json::to_string(&TopicAssignment::new(&assignment))
            .map_err(|e| BrokerError::from_serialization_error(e, "encode topic assignment"))?;
        match self
            .session
            .write(&paths::topic(&spec.name), &assignment_entry)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_node_exists() => return Err(already_exists()),
            Err(e) => return Err(e.into()),
        }

        info!(
            "Created topic '{}' with {} partition(s), replication factor {}",
            spec.name, spec.partitions, spec.replication_factor
        );
        Ok(assignment)
    }

    /// Names under `/brokers/topics`, including topics brokers cannot decode.
    pub async fn list_topics(&self) -> Result<Vec<String>, BrokerError> {
        Ok(self.session.children(paths::BROKER_TOPICS).await?)
    }

    pub async fn topic_exists(&self, topic: &str) -> Result<bool, BrokerError> {
        Ok(self.session.exists(&paths::topic(topic)).await?)
    }

    /// Registered brokers sorted by id. Registrations that fail to decode are skipped.
    pub async fn brokers(&self) -> Result<Vec<(i32, BrokerRegistration)>, BrokerError> {
        let mut brokers = Vec::new();
        for child in self.session.children(paths::BROKER_IDS).await? {
            let Ok(id) = child.parse::<i32>() else {
                warn!("Ignoring non-numeric broker id '{child}'");
                continue;
            };
            let raw = self.session.read(&paths::broker(id)).await?;
            match serde_json::from_str::<BrokerRegistration>(&raw) {
                Ok(registration) => brokers.push((id, registration)),
                Err(e) => warn!("Ignoring undecodable registration of broker {id}: {e}"),
            }
        }
        brokers.sort_by_key(|(id, _)| *id);
        Ok(brokers)
    }

    pub fn close(self) {
        debug!("Closing admin session");
        self.session.close();
    }
}

fn check_format(format: EntryFormat) -> Result<(), HarnessError> {
    if format == EntryFormat::Utf8 {
        Ok(())
    } else {
        Err(HarnessError::invalid_setting(
            "serializer",
            format!(
                "brokers read coordination entries as {}, not {format}; topics created this way would never be served",
                EntryFormat::Utf8
            ),
        ))
    }
}

pub fn validate_topic_name(name: &str) -> Result<(), AdminError> {
    let invalid = |reason: &str| AdminError::InvalidTopicName {
        topic: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("topic name is empty"));
    }
    if name == "." || name == ".." {
        return Err(invalid("topic name cannot be '.' or '..'"));
    }
    if name.len() > MAX_TOPIC_NAME_LENGTH {
        return Err(invalid(&format!(
            "topic name is longer than {MAX_TOPIC_NAME_LENGTH} characters"
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(invalid(&format!(
            "illegal character '{c}', only ASCII alphanumerics, '.', '_' and '-' are allowed"
        )));
    }
    Ok(())
}

/// Topics whose names differ only in `.` versus `_` collide in metric names.
fn check_collision(name: &str, existing: &[String]) -> Result<(), AdminError> {
    if !name.contains(['.', '_']) {
        return Ok(());
    }
    let normalized = name.replace('.', "_");
    match existing
        .iter()
        .find(|topic| topic.as_str() != name && topic.replace('.', "_") == normalized)
    {
        Some(other) => Err(AdminError::InvalidTopicName {
            topic: name.to_string(),
            reason: format!("collides with existing topic '{other}'"),
        }),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Copy)]
enum ConfigKind {
    Long,
    Int,
    Ratio,
    Bool,
    OneOf(&'static [&'static str]),
    Any,
}

const CLEANUP_POLICIES: &[&str] = &["delete", "compact", "compact,delete", "delete,compact"];
const COMPRESSION_TYPES: &[&str] = &["uncompressed", "zstd", "lz4", "snappy", "gzip", "producer"];
const TIMESTAMP_TYPES: &[&str] = &["CreateTime", "LogAppendTime"];

const TOPIC_CONFIGS: &[(&str, ConfigKind)] = &[
    ("cleanup.policy", ConfigKind::OneOf(CLEANUP_POLICIES)),
    ("compression.type", ConfigKind::OneOf(COMPRESSION_TYPES)),
    ("delete.retention.ms", ConfigKind::Long),
    ("file.delete.delay.ms", ConfigKind::Long),
    ("flush.messages", ConfigKind::Long),
    ("flush.ms", ConfigKind::Long),
    ("follower.replication.throttled.replicas", ConfigKind::Any),
    ("index.interval.bytes", ConfigKind::Int),
    ("leader.replication.throttled.replicas", ConfigKind::Any),
    ("max.compaction.lag.ms", ConfigKind::Long),
    ("max.message.bytes", ConfigKind::Int),
    ("message.downconversion.enable", ConfigKind::Bool),
    ("message.format.version", ConfigKind::Any),
    ("message.timestamp.difference.max.ms", ConfigKind::Long),
    ("message.timestamp.type", ConfigKind::OneOf(TIMESTAMP_TYPES)),
    ("min.cleanable.dirty.ratio", ConfigKind::Ratio),
    ("min.compaction.lag.ms", ConfigKind::Long),
    ("min.insync.replicas", ConfigKind::Int),
    ("preallocate", ConfigKind::Bool),
    ("retention.bytes", ConfigKind::Long),
    ("retention.ms", ConfigKind::Long),
    ("segment.bytes", ConfigKind::Int),
    ("segment.index.bytes", ConfigKind::Int),
    ("segment.jitter.ms", ConfigKind::Long),
    ("segment.ms", ConfigKind::Long),
    ("unclean.leader.election.enable", ConfigKind::Bool),
];

/// Only known topic-level keys are accepted, and their values must parse.
pub fn validate_topic_config(config: &Properties) -> Result<(), AdminError> {
    for (key, value) in config.iter() {
        let Some((_, kind)) = TOPIC_CONFIGS.iter().find(|(name, _)| *name == key) else {
            return Err(AdminError::InvalidConfig {
                key: key.to_string(),
                reason: "unknown topic config".to_string(),
            });
        };
        let value = value.trim();
        let valid = match kind {
            ConfigKind::Long => value.parse::<i64>().is_ok(),
            ConfigKind::Int => value.parse::<i32>().is_ok(),
            ConfigKind::Ratio => value
                .parse::<f64>()
                .is_ok_and(|ratio| (0.0..=1.0).contains(&ratio)),
            ConfigKind::Bool => value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false"),
            ConfigKind::OneOf(allowed) => allowed.contains(&value.replace(' ', "").as_str()),
            ConfigKind::Any => true,
        };
        if !valid {
            return Err(AdminError::InvalidConfig {
                key: key.to_string(),
                reason: format!("invalid value '{value}'"),
            });
        }
    }
    Ok(())
}

/// Round-robin replica placement with a shifting follower offset.
///
/// The first replica of partition `p` goes to broker `(p + start) % n`; followers
/// follow at a distance that grows by one every `n` partitions. `start` and the
/// initial shift are derived from the topic name.
pub fn assign_replicas(
    topic: &str,
    brokers: &[BrokerMetadata],
    partitions: i32,
    replication_factor: i32,
    mode: RackAwareMode,
) -> Result<BTreeMap<u32, Vec<i32>>, AdminError> {
    if partitions < 1 {
        return Err(AdminError::InvalidPartitions {
            topic: topic.to_string(),
            partitions,
        });
    }
    if replication_factor < 1 || replication_factor as usize > brokers.len() {
        return Err(AdminError::InvalidReplicationFactor {
            topic: topic.to_string(),
            requested: replication_factor,
            available_brokers: brokers.len(),
        });
    }

    let with_rack = brokers.iter().filter(|b| b.rack.is_some()).count();
    let racks_consistent = with_rack == 0 || with_rack == brokers.len();
    if mode == RackAwareMode::Enforced && !racks_consistent {
        return Err(AdminError::RackAwareViolation {
            reason: format!(
                "{with_rack} of {} brokers have rack information",
                brokers.len()
            ),
        });
    }
    let use_racks = mode != RackAwareMode::Disabled && with_rack == brokers.len() && with_rack > 0;

    let ordered: Vec<i32> = if use_racks {
        rack_alternated(brokers)
    } else {
        let mut ids: Vec<i32> = brokers.iter().map(|b| b.id).collect();
        ids.sort_unstable();
        ids
    };

    let n = ordered.len();
    let seed = to_positive(murmur2(topic.as_bytes())) as usize;
    let start = seed % n;
    let mut shift = if n > 1 { (seed / n) % (n - 1) } else { 0 };

    let mut assignment = BTreeMap::new();
    for p in 0..partitions as usize {
        if p > 0 && p % n == 0 {
            shift += 1;
        }
        let first = (p + start) % n;
        let mut replicas = vec![ordered[first]];
        for j in 0..(replication_factor as usize - 1) {
            replicas.push(ordered[replica_index(first, shift, j, n)]);
        }
        assignment.insert(p as u32, replicas);
    }
    Ok(assignment)
}

fn replica_index(first: usize, shift: usize, replica: usize, n: usize) -> usize {
    let step = 1 + (shift + replica) % (n - 1);
    (first + step) % n
}

/// Broker ids interleaved by rack: first broker of each rack, then the second, ...
fn rack_alternated(brokers: &[BrokerMetadata]) -> Vec<i32> {
    let mut by_rack: BTreeMap<&str, Vec<i32>> = BTreeMap::new();
    for broker in brokers {
        by_rack
            .entry(broker.rack.as_deref().unwrap_or_default())
            .or_default()
            .push(broker.id);
    }
    for ids in by_rack.values_mut() {
        ids.sort_unstable();
    }

    let longest = by_rack.values().map(Vec::len).max().unwrap_or(0);
    let mut ordered = Vec::with_capacity(brokers.len());
    for i in 0..longest {
        for ids in by_rack.values() {
            if let Some(id) = ids.get(i) {
                ordered.push(*id);
            }
        }
    }
    ordered
}
