//! Topics served by this broker.
//!
//! A topic is served once its `/brokers/topics/<topic>` entry decodes as UTF-8
//! JSON. Entries that do not decode are remembered as phantoms, keyed by the entry
//! version, so they are logged once and retried only after being rewritten.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use streamrig::Properties;
use streamrig::types::{TopicAssignment, TopicConfigEntry, paths};
use streamrig_coordination::CoordinationClient;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::BrokerError;
use crate::log::PartitionLog;
use crate::partitioner::Partitioner;
use crate::{debug, info, warn};

pub const MAX_MESSAGE_BYTES: &str = "max.message.bytes";

#[derive(Debug)]
pub struct TopicState {
    name: String,
    logs: Vec<Mutex<PartitionLog>>,
    replicas: BTreeMap<u32, Vec<i32>>,
    config: Properties,
    partitioner: Partitioner,
}

impl TopicState {
    /// Opens a log for every assigned partition.
    pub fn open(
        log_dir: &Path,
        name: &str,
        replicas: BTreeMap<u32, Vec<i32>>,
        config: Properties,
    ) -> Result<Self, BrokerError> {
        let expected: Vec<u32> = (0..replicas.len() as u32).collect();
        if replicas.keys().copied().collect::<Vec<_>>() != expected {
            return Err(BrokerError::Storage {
                context: format!("topic '{name}' assignment"),
                reason: "partition ids are not contiguous from 0".to_string(),
            });
        }

        let logs = replicas
            .keys()
            .map(|partition| PartitionLog::open(log_dir, name, *partition).map(Mutex::new))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: name.to_string(),
            logs,
            replicas,
            config,
            partitioner: Partitioner::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partition_count(&self) -> u32 {
        self.logs.len() as u32
    }

    pub fn log(&self, partition: u32) -> Result<&Mutex<PartitionLog>, BrokerError> {
        self.logs
            .get(partition as usize)
            .ok_or_else(|| BrokerError::PartitionNotFound {
                topic: self.name.clone(),
                partition,
            })
    }

    pub fn replicas(&self, partition: u32) -> &[i32] {
        self.replicas
            .get(&partition)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn config(&self) -> &Properties {
        &self.config
    }

    /// Explicit partition if given, else by key hash, else round-robin.
    pub fn choose_partition(&self, requested: Option<u32>, key: Option<&[u8]>) -> u32 {
        requested.unwrap_or_else(|| self.partitioner.partition(key, self.partition_count()))
    }

    /// Topic-level `max.message.bytes`, when set and valid.
    pub fn max_message_bytes(&self) -> Option<usize> {
        self.config
            .get(MAX_MESSAGE_BYTES)
            .and_then(|value| value.trim().parse().ok())
    }
}

#[derive(Debug)]
pub struct TopicRegistry {
    log_dir: PathBuf,
    topics: DashMap<String, Arc<TopicState>>,
    phantoms: DashMap<String, i64>,
}

impl TopicRegistry {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            topics: DashMap::new(),
            phantoms: DashMap::new(),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn get(&self, name: &str) -> Option<Arc<TopicState>> {
        self.topics.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `name` has an assignment entry this broker cannot decode.
    pub fn is_phantom(&self, name: &str) -> bool {
        self.phantoms.contains_key(name)
    }

    /// Served topic names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Serves `name` from a raw assignment entry. Returns `None` if the entry does
    /// not decode; `version` identifies the entry so a phantom is reported once.
    pub fn materialize(
        &self,
        name: &str,
        raw: &[u8],
        version: i64,
        config: Properties,
    ) -> Result<Option<Arc<TopicState>>, BrokerError> {
        if let Some(existing) = self.get(name) {
            return Ok(Some(existing));
        }

        let assignment = match decode_assignment(raw) {
            Ok(assignment) => assignment,
            Err(reason) => {
                let previous = self.phantoms.insert(name.to_string(), version);
                if previous != Some(version) {
                    warn!(
                        "Topic '{name}' has an undecodable assignment entry ({reason}); it will not be served"
                    );
                }
                return Ok(None);
            }
        };

        let entry = self.topics.entry(name.to_string());
        let state = match entry {
            dashmap::mapref::entry::Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let state = Arc::new(TopicState::open(
                    &self.log_dir,
                    name,
                    assignment.replicas_by_partition(),
                    config,
                )?);
                vacant.insert(Arc::clone(&state));
                self.phantoms.remove(name);
                info!(
                    "Serving topic '{name}' with {} partition(s)",
                    state.partition_count()
                );
                state
            }
        };
        Ok(Some(state))
    }

    /// Looks up `name` in the coordination service and serves it if possible.
    /// `None` if the topic has no entry or its entry does not decode.
    pub async fn sync_topic(
        &self,
        client: &CoordinationClient,
        name: &str,
    ) -> Result<Option<Arc<TopicState>>, BrokerError> {
        if let Some(existing) = self.get(name) {
            return Ok(Some(existing));
        }

        let (raw, stat) = match client.get_data(&paths::topic(name)).await {
            Ok(found) => found,
            Err(e) if e.is_no_node() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if self.phantoms.get(name).is_some_and(|seen| *seen == stat.version) {
            return Ok(None);
        }

        let config = read_topic_config(client, name).await?;
        self.materialize(name, &raw, stat.version, config)
    }

    /// Serves every decodable topic registered in the coordination service and
    /// returns how many were newly served.
    pub async fn sync_all(&self, client: &CoordinationClient) -> Result<usize, BrokerError> {
        let mut added = 0;
        for name in client.get_children_or_empty(paths::BROKER_TOPICS).await? {
            if self.topics.contains_key(&name) {
                continue;
            }
            if self.sync_topic(client, &name).await?.is_some() {
                added += 1;
            }
        }
        if added > 0 {
            debug!("Topic sync picked up {added} topic(s)");
        }
        Ok(added)
    }
}

fn decode_assignment(raw: &[u8]) -> Result<TopicAssignment, String> {
    let text = std::str::from_utf8(raw).map_err(|e| format!("not utf-8: {e}"))?;
    let assignment: TopicAssignment =
        serde_json::from_str(text).map_err(|e| format!("not an assignment: {e}"))?;
    if assignment.replicas_by_partition().is_empty() {
        return Err("no partitions".to_string());
    }
    Ok(assignment)
}

async fn read_topic_config(
    client: &CoordinationClient,
    name: &str,
) -> Result<Properties, BrokerError> {
    let raw = match client.get_data(&paths::topic_config(name)).await {
        Ok((raw, _)) => raw,
        Err(e) if e.is_no_node() => return Ok(Properties::new()),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice::<TopicConfigEntry>(&raw) {
        Ok(entry) => Ok(Properties::from(entry.config)),
        Err(e) => {
            warn!("Ignoring undecodable config for topic '{name}': {e}");
            Ok(Properties::new())
        }
    }
}

/// Polls the coordination service every `interval` until `shutdown` flips to
/// `true`. Sync failures are logged and retried on the next tick.
pub fn spawn_sync_task(
    registry: Arc<TopicRegistry>,
    client: CoordinationClient,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = registry.sync_all(&client).await {
                        debug!("Topic sync failed: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Topic sync task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn assignment_json(partitions: u32) -> Vec<u8> {
        let assignment: BTreeMap<u32, Vec<i32>> = (0..partitions).map(|p| (p, vec![0])).collect();
        serde_json::to_vec(&TopicAssignment::new(&assignment)).unwrap()
    }

    #[test]
    fn test_materialize_opens_partition_logs() {
        let dir = tempdir().unwrap();
        let registry = TopicRegistry::new(dir.path());

        let state = registry
            .materialize("orders", &assignment_json(3), 0, Properties::new())
            .unwrap()
            .unwrap();
        assert_eq!(state.partition_count(), 3);
        assert_eq!(state.replicas(2), &[0]);
        assert!(dir.path().join("orders-2").is_dir());
        assert_eq!(registry.names(), vec!["orders".to_string()]);

        let again = registry
            .materialize("orders", &assignment_json(3), 0, Properties::new())
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&state, &again));
    }

    #[test]
    fn test_undecodable_entry_is_phantom() {
        let dir = tempdir().unwrap();
        let registry = TopicRegistry::new(dir.path());

        let mut framed = vec![0xAC, 0xED, 0x00, 0x05, 0x74, 0x00, 0x02];
        framed.extend_from_slice(b"{}");
        assert!(registry.materialize("ghost", &framed, 0, Properties::new()).unwrap().is_none());
        assert!(registry.is_phantom("ghost"));
        assert!(registry.get("ghost").is_none());
        assert!(registry.is_empty());

        registry
            .materialize("ghost", &assignment_json(1), 1, Properties::new())
            .unwrap()
            .unwrap();
        assert!(!registry.is_phantom("ghost"));
    }

    #[test]
    fn test_partition_lookup_and_limits() {
        let dir = tempdir().unwrap();
        let registry = TopicRegistry::new(dir.path());
        let state = registry
            .materialize(
                "t",
                &assignment_json(2),
                0,
                Properties::new().with(MAX_MESSAGE_BYTES, "16"),
            )
            .unwrap()
            .unwrap();

        assert!(state.log(1).is_ok());
        assert!(matches!(
            state.log(2).unwrap_err(),
            BrokerError::PartitionNotFound { partition: 2, .. }
        ));
        assert_eq!(state.max_message_bytes(), Some(16));
        assert_eq!(state.choose_partition(Some(1), None), 1);
    }

    #[test]
    fn test_gapped_assignment_is_rejected() {
        let dir = tempdir().unwrap();
        let mut replicas = BTreeMap::new();
        replicas.insert(0u32, vec![0]);
        replicas.insert(2u32, vec![0]);
        assert!(TopicState::open(dir.path(), "t", replicas, Properties::new()).is_err());
    }
}
