//! Schema state kept in memory and persisted to the storage topic.
//!
//! Every mutation is produced to partition 0 of the storage topic first and applied
//! to the in-memory cache only once the broker acknowledged it. A fresh store
//! rebuilds its cache by replaying the topic from offset 0.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use parking_lot::RwLock;
use serde::Serialize;
use streamrig_broker::BrokerClient;
use tokio::sync::Mutex;

use crate::compatibility::CompatibilityLevel;
use crate::error::SchemaError;
use crate::records::{DeleteSubjectValue, SchemaValue, StoreEntry};
use crate::{debug, info, warn};

const STORE_PARTITION: u32 = 0;

/// One registered version of a subject, as reported by the REST API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaVersion {
    pub subject: String,
    pub version: i32,
    pub id: i32,
    pub schema: String,
}

#[derive(Debug, Clone, Copy)]
struct VersionEntry {
    id: i32,
    deleted: bool,
}

#[derive(Debug, Default)]
struct Cache {
    schemas_by_id: BTreeMap<i32, String>,
    ids_by_schema: HashMap<String, i32>,
    subjects: BTreeMap<String, BTreeMap<i32, VersionEntry>>,
    global_level: Option<CompatibilityLevel>,
    subject_levels: HashMap<String, CompatibilityLevel>,
}

impl Cache {
    fn apply(&mut self, entry: StoreEntry) {
        match entry {
            StoreEntry::Schema(value) => {
                let identity =
                    canonicalize(&value.schema).unwrap_or_else(|_| value.schema.clone());
                self.ids_by_schema.entry(identity).or_insert(value.id);
                self.schemas_by_id.entry(value.id).or_insert(value.schema);
                self.subjects.entry(value.subject).or_default().insert(
                    value.version,
                    VersionEntry {
                        id: value.id,
                        deleted: value.deleted,
                    },
                );
            }
            StoreEntry::Config {
                subject: None,
                level,
            } => self.global_level = Some(level),
            StoreEntry::Config {
                subject: Some(subject),
                level,
            } => {
                self.subject_levels.insert(subject, level);
            }
            StoreEntry::DeleteSubject(value) => {
                if let Some(versions) = self.subjects.get_mut(&value.subject) {
                    for (_, entry) in versions.range_mut(..=value.version) {
                        entry.deleted = true;
                    }
                }
            }
        }
    }

    fn live_versions(&self, subject: &str) -> Option<Vec<(i32, i32)>> {
        let live: Vec<(i32, i32)> = self
            .subjects
            .get(subject)?
            .iter()
            .filter(|(_, entry)| !entry.deleted)
            .map(|(version, entry)| (*version, entry.id))
            .collect();
        (!live.is_empty()).then_some(live)
    }

    fn next_id(&self) -> i32 {
        self.schemas_by_id.keys().next_back().map_or(1, |id| id + 1)
    }
}

/// Registered schemas, subjects and compatibility settings.
///
/// Schemas are kept as submitted; identity is decided on their canonical form.
pub struct SchemaStore {
    client: BrokerClient,
    topic: String,
    default_level: CompatibilityLevel,
    cache: RwLock<Cache>,
    /// Serializes writers so version and id allocation never race.
    writer: Mutex<()>,
}

impl SchemaStore {
    pub fn new(client: BrokerClient, topic: impl Into<String>, default_level: CompatibilityLevel) -> Self {
        Self {
            client,
            topic: topic.into(),
            default_level,
            cache: RwLock::new(Cache::default()),
            writer: Mutex::new(()),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Reads the storage topic from the beginning and applies every record.
    /// Returns the number of records applied.
    pub async fn replay(&self) -> Result<usize, SchemaError> {
        let records = self
            .client
            .fetch_all(&self.topic, STORE_PARTITION, 0)
            .await?;
        let mut applied = 0;
        let mut cache = self.cache.write();
        for stored in &records {
            match StoreEntry::from_record(&stored.record) {
                Ok(Some(entry)) => {
                    cache.apply(entry);
                    applied += 1;
                }
                Ok(None) => {}
                Err(e) => warn!(
                    "Skipping unreadable record at offset {} of '{}': {}",
                    stored.offset, self.topic, e
                ),
            }
        }
        info!(
            "Replayed {} of {} records from '{}'",
            applied,
            records.len(),
            self.topic
        );
        Ok(applied)
    }

    /// Registers `schema` under `subject` and returns its global id.
    ///
    /// A schema identical to one already registered anywhere keeps that id; one
    /// identical to a live version of the subject adds no new version.
    pub async fn register(&self, subject: &str, schema: &str) -> Result<i32, SchemaError> {
        let canonical = canonicalize(schema)?;
        let _guard = self.writer.lock().await;

        let value = {
            let cache = self.cache.read();
            let existing_id = cache.ids_by_schema.get(&canonical).copied();
            if let Some(id) = existing_id {
                let already_live = cache
                    .live_versions(subject)
                    .is_some_and(|live| live.iter().any(|(_, live_id)| *live_id == id));
                if already_live {
                    debug!("Schema {} already registered under '{}'", id, subject);
                    return Ok(id);
                }
            }
            let version = cache
                .subjects
                .get(subject)
                .and_then(|versions| versions.keys().next_back())
                .map_or(1, |v| v + 1);
            SchemaValue {
                subject: subject.to_string(),
                version,
                id: existing_id.unwrap_or_else(|| cache.next_id()),
                schema: schema.trim().to_string(),
                deleted: false,
            }
        };

        let id = value.id;
        info!(
            "Registering schema {} as version {} of '{}'",
            id, value.version, subject
        );
        self.persist(StoreEntry::Schema(value)).await?;
        Ok(id)
    }

    /// Finds the live version of `subject` holding `schema`.
    pub fn lookup(&self, subject: &str, schema: &str) -> Result<SchemaVersion, SchemaError> {
        let canonical = canonicalize(schema)?;
        let cache = self.cache.read();
        let live = cache
            .live_versions(subject)
            .ok_or_else(|| subject_not_found(subject))?;
        let id = cache
            .ids_by_schema
            .get(&canonical)
            .ok_or(SchemaError::SchemaNotFound { id: None })?;
        let (version, id) = live
            .iter()
            .find(|(_, live_id)| live_id == id)
            .copied()
            .ok_or(SchemaError::SchemaNotFound { id: None })?;
        let schema = cache
            .schemas_by_id
            .get(&id)
            .cloned()
            .ok_or(SchemaError::SchemaNotFound { id: Some(id) })?;
        Ok(SchemaVersion {
            subject: subject.to_string(),
            version,
            id,
            schema,
        })
    }

    /// Subjects with at least one live version, sorted.
    pub fn subjects(&self) -> Vec<String> {
        let cache = self.cache.read();
        cache
            .subjects
            .keys()
            .filter(|subject| cache.live_versions(subject).is_some())
            .cloned()
            .collect()
    }

    pub fn versions(&self, subject: &str) -> Result<Vec<i32>, SchemaError> {
        self.cache
            .read()
            .live_versions(subject)
            .map(|live| live.into_iter().map(|(version, _)| version).collect())
            .ok_or_else(|| subject_not_found(subject))
    }

    /// Resolves `version`, either `latest` or a positive integer, for `subject`.
    pub fn version(&self, subject: &str, version: &str) -> Result<SchemaVersion, SchemaError> {
        let requested = parse_version(version)?;
        let cache = self.cache.read();
        let live = cache
            .live_versions(subject)
            .ok_or_else(|| subject_not_found(subject))?;
        let found = match requested {
            None => live.last().copied(),
            Some(n) => live.iter().find(|(v, _)| *v == n).copied(),
        };
        let (version_number, id) = found.ok_or_else(|| SchemaError::VersionNotFound {
            subject: subject.to_string(),
            version: version.to_string(),
        })?;
        let schema = cache
            .schemas_by_id
            .get(&id)
            .cloned()
            .ok_or(SchemaError::SchemaNotFound { id: Some(id) })?;
        Ok(SchemaVersion {
            subject: subject.to_string(),
            version: version_number,
            id,
            schema,
        })
    }

    pub fn schema_by_id(&self, id: i32) -> Result<String, SchemaError> {
        self.cache
            .read()
            .schemas_by_id
            .get(&id)
            .cloned()
            .ok_or(SchemaError::SchemaNotFound { id: Some(id) })
    }

    /// Soft-deletes every live version of `subject` and returns their numbers.
    /// Schema ids stay resolvable.
    pub async fn delete_subject(&self, subject: &str) -> Result<Vec<i32>, SchemaError> {
        let _guard = self.writer.lock().await;
        let versions = self.versions(subject)?;
        let latest = versions.last().copied().unwrap_or_default();
        info!("Deleting subject '{}' ({} versions)", subject, versions.len());
        self.persist(StoreEntry::DeleteSubject(DeleteSubjectValue {
            subject: subject.to_string(),
            version: latest,
        }))
        .await?;
        Ok(versions)
    }

    pub fn global_level(&self) -> CompatibilityLevel {
        self.cache.read().global_level.unwrap_or(self.default_level)
    }

    pub async fn set_global_level(&self, level: CompatibilityLevel) -> Result<(), SchemaError> {
        let _guard = self.writer.lock().await;
        self.persist(StoreEntry::Config {
            subject: None,
            level,
        })
        .await
    }

    /// The subject's own level, falling back to the global one.
    pub fn subject_level(&self, subject: &str) -> CompatibilityLevel {
        let cache = self.cache.read();
        cache
            .subject_levels
            .get(subject)
            .copied()
            .or(cache.global_level)
            .unwrap_or(self.default_level)
    }

    pub async fn set_subject_level(
        &self,
        subject: &str,
        level: CompatibilityLevel,
    ) -> Result<(), SchemaError> {
        let _guard = self.writer.lock().await;
        self.persist(StoreEntry::Config {
            subject: Some(subject.to_string()),
            level,
        })
        .await
    }

    async fn persist(&self, entry: StoreEntry) -> Result<(), SchemaError> {
        let record = entry.to_record()?;
        self.client
            .produce(&self.topic, Some(STORE_PARTITION), std::slice::from_ref(&record))
            .await?;
        self.cache.write().apply(entry);
        Ok(())
    }
}

impl fmt::Debug for SchemaStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaStore")
            .field("topic", &self.topic)
            .field("default_level", &self.default_level)
            .finish_non_exhaustive()
    }
}

/// Parses `schema` as a JSON document and returns the form used to decide
/// whether two schemas are identical. Object keys come out sorted.
pub fn canonicalize(schema: &str) -> Result<String, SchemaError> {
    if schema.trim().is_empty() {
        return Err(SchemaError::invalid_schema("Empty schema"));
    }
    let parsed: serde_json::Value =
        serde_json::from_str(schema).map_err(SchemaError::invalid_schema)?;
    if parsed.is_null() {
        return Err(SchemaError::invalid_schema("Schema must not be null"));
    }
    Ok(parsed.to_string())
}

/// `None` stands for `latest`.
fn parse_version(version: &str) -> Result<Option<i32>, SchemaError> {
    if version.eq_ignore_ascii_case("latest") {
        return Ok(None);
    }
    match version.parse::<i32>() {
        Ok(n) if n >= 1 => Ok(Some(n)),
        // Confluent accepts -1 as an alias for latest.
        Ok(-1) => Ok(None),
        _ => Err(SchemaError::InvalidVersion {
            version: version.to_string(),
        }),
    }
}

fn subject_not_found(subject: &str) -> SchemaError {
    SchemaError::SubjectNotFound {
        subject: subject.to_string(),
    }
}
