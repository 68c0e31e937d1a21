//! Records, topic specifications, and the entries stored in the coordination service.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::Properties;

// =============================================================================
// RECORDS
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    #[serde(default)]
    pub headers: HashMap<String, Vec<u8>>,
}

impl Record {
    pub fn new(key: Option<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key,
            value: value.into(),
            headers: HashMap::new(),
        }
    }

    /// A record with a null key.
    pub fn from_value(value: impl Into<Vec<u8>>) -> Self {
        Self::new(None, value)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Approximate on-wire size used for `message.max.bytes` checks.
    pub fn size_in_bytes(&self) -> usize {
        let key = self.key.as_ref().map_or(0, Vec::len);
        let headers: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        key + self.value.len() + headers
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(flatten)]
    pub record: Record,
    pub offset: u64,
    pub timestamp_ms: i64,
}

impl StoredRecord {
    pub fn from_record(record: Record, offset: u64) -> Self {
        Self {
            record,
            offset,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}

// =============================================================================
// TOPICS
// =============================================================================

/// What to create: name, partition count, replication factor, topic-level config.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
    pub config: Properties,
}

impl TopicSpec {
    /// One partition, replication factor one, no extra config.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: 1,
            replication_factor: 1,
            config: Properties::new(),
        }
    }

    pub fn partitions(mut self, partitions: i32) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn replication_factor(mut self, replication_factor: i32) -> Self {
        self.replication_factor = replication_factor;
        self
    }

    pub fn config(mut self, config: Properties) -> Self {
        self.config = config;
        self
    }
}

// =============================================================================
// COORDINATION ENTRIES
// =============================================================================

/// Well-known coordination paths.
pub mod paths {
    pub const BROKER_IDS: &str = "/brokers/ids";
    pub const BROKER_TOPICS: &str = "/brokers/topics";
    pub const CONFIG_TOPICS: &str = "/config/topics";
    pub const CLUSTER_ID: &str = "/cluster/id";

    pub fn broker(broker_id: i32) -> String {
        format!("{BROKER_IDS}/{broker_id}")
    }

    pub fn topic(topic: &str) -> String {
        format!("{BROKER_TOPICS}/{topic}")
    }

    pub fn topic_config(topic: &str) -> String {
        format!("{CONFIG_TOPICS}/{topic}")
    }
}

/// Content of `/brokers/ids/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerRegistration {
    pub version: i32,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub rack: Option<String>,
    pub endpoints: Vec<String>,
    pub timestamp: String,
}

impl BrokerRegistration {
    pub fn new(host: &str, port: u16, rack: Option<String>) -> Self {
        Self {
            version: 4,
            host: host.to_string(),
            port,
            rack,
            endpoints: vec![format!("PLAINTEXT://{host}:{port}")],
            timestamp: chrono::Utc::now().timestamp_millis().to_string(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Content of `/brokers/topics/<topic>`: partition id to replica broker ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicAssignment {
    pub version: i32,
    pub partitions: BTreeMap<String, Vec<i32>>,
}

impl TopicAssignment {
    pub fn new(assignment: &BTreeMap<u32, Vec<i32>>) -> Self {
        Self {
            version: 1,
            partitions: assignment
                .iter()
                .map(|(partition, replicas)| (partition.to_string(), replicas.clone()))
                .collect(),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Partition ids with their replicas, skipping keys that are not numbers.
    pub fn replicas_by_partition(&self) -> BTreeMap<u32, Vec<i32>> {
        self.partitions
            .iter()
            .filter_map(|(partition, replicas)| {
                partition.parse::<u32>().ok().map(|p| (p, replicas.clone()))
            })
            .collect()
    }
}

/// Content of `/config/topics/<topic>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfigEntry {
    pub version: i32,
    pub config: BTreeMap<String, String>,
}

impl TopicConfigEntry {
    pub fn new(config: &Properties) -> Self {
        Self {
            version: 1,
            config: config.clone().into_map(),
        }
    }
}

/// Content of `/cluster/id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterIdEntry {
    pub version: String,
    pub id: String,
}
