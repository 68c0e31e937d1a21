//! Key and value formats of the records kept in the storage topic.
//!
//! Every registry write is one record whose key names what changed and whose
//! value carries the new state, both as JSON.

use serde::{Deserialize, Serialize};
use streamrig::Record;

use crate::compatibility::CompatibilityLevel;
use crate::error::SchemaError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "keytype", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreKey {
    Schema {
        subject: String,
        version: i32,
        magic: i32,
    },
    Config {
        subject: Option<String>,
        magic: i32,
    },
    DeleteSubject {
        subject: String,
        magic: i32,
    },
    Noop {
        magic: i32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaValue {
    pub subject: String,
    pub version: i32,
    pub id: i32,
    pub schema: String,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigValue {
    #[serde(rename = "compatibilityLevel")]
    pub compatibility_level: CompatibilityLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSubjectValue {
    pub subject: String,
    /// Highest version deleted.
    pub version: i32,
}

/// One decoded change to the registry state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEntry {
    Schema(SchemaValue),
    Config {
        subject: Option<String>,
        level: CompatibilityLevel,
    },
    DeleteSubject(DeleteSubjectValue),
}

impl StoreEntry {
    pub fn to_record(&self) -> Result<Record, SchemaError> {
        let (key, value) = match self {
            StoreEntry::Schema(value) => (
                StoreKey::Schema {
                    subject: value.subject.clone(),
                    version: value.version,
                    magic: 1,
                },
                serde_json::to_vec(value),
            ),
            StoreEntry::Config { subject, level } => (
                StoreKey::Config {
                    subject: subject.clone(),
                    magic: 0,
                },
                serde_json::to_vec(&ConfigValue {
                    compatibility_level: *level,
                }),
            ),
            StoreEntry::DeleteSubject(value) => (
                StoreKey::DeleteSubject {
                    subject: value.subject.clone(),
                    magic: 0,
                },
                serde_json::to_vec(value),
            ),
        };
        let key = serde_json::to_vec(&key)
            .map_err(|e| SchemaError::from_serialization_error(e, "encode store key"))?;
        let value =
            value.map_err(|e| SchemaError::from_serialization_error(e, "encode store value"))?;
        Ok(Record::new(Some(key), value))
    }

    /// Decodes a stored record. `None` for no-op markers.
    pub fn from_record(record: &Record) -> Result<Option<Self>, SchemaError> {
        let Some(raw_key) = &record.key else {
            return Err(SchemaError::from_serialization_error(
                "record has no key",
                "decode store record",
            ));
        };
        let key: StoreKey = serde_json::from_slice(raw_key)
            .map_err(|e| SchemaError::from_serialization_error(e, "decode store key"))?;
        let decode = |context: &str| {
            let context = context.to_string();
            move |e: serde_json::Error| SchemaError::from_serialization_error(e, &context)
        };

        let entry = match key {
            StoreKey::Schema { .. } => StoreEntry::Schema(
                serde_json::from_slice(&record.value).map_err(decode("decode schema value"))?,
            ),
            StoreKey::Config { subject, .. } => {
                let value: ConfigValue =
                    serde_json::from_slice(&record.value).map_err(decode("decode config value"))?;
                StoreEntry::Config {
                    subject,
                    level: value.compatibility_level,
                }
            }
            StoreKey::DeleteSubject { .. } => StoreEntry::DeleteSubject(
                serde_json::from_slice(&record.value)
                    .map_err(decode("decode delete-subject value"))?,
            ),
            StoreKey::Noop { .. } => return Ok(None),
        };
        Ok(Some(entry))
    }
}
