//! Error types for schema registry operations.

use std::fmt;

use streamrig::HarnessError;
use streamrig_broker::BrokerError;

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    SubjectNotFound {
        subject: String,
    },
    VersionNotFound {
        subject: String,
        version: String,
    },
    SchemaNotFound {
        id: Option<i32>,
    },
    InvalidSchema {
        reason: String,
    },
    InvalidVersion {
        version: String,
    },
    InvalidCompatibilityLevel {
        level: String,
    },
    /// The storage topic could not be read or written.
    Store(BrokerError),
    Storage {
        context: String,
        reason: String,
    },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::SubjectNotFound { subject } => write!(f, "Subject '{subject}' not found."),
            SchemaError::VersionNotFound { subject, version } => {
                write!(f, "Version {version} not found for subject '{subject}'.")
            }
            SchemaError::SchemaNotFound { id: Some(id) } => write!(f, "Schema {id} not found."),
            SchemaError::SchemaNotFound { id: None } => write!(f, "Schema not found."),
            SchemaError::InvalidSchema { reason } => write!(f, "Invalid schema: {reason}"),
            SchemaError::InvalidVersion { version } => write!(
                f,
                "The specified version '{version}' is not a valid version id. Allowed values are between [1, 2^31-1] and the string \"latest\""
            ),
            SchemaError::InvalidCompatibilityLevel { level } => {
                write!(f, "Invalid compatibility level: {level}")
            }
            SchemaError::Store(err) => write!(f, "Error in the backend data store: {err}"),
            SchemaError::Storage { context, reason } => {
                write!(f, "Error in the backend data store ({context}): {reason}")
            }
        }
    }
}

impl std::error::Error for SchemaError {}

impl From<BrokerError> for SchemaError {
    fn from(err: BrokerError) -> Self {
        SchemaError::Store(err)
    }
}

impl From<SchemaError> for HarnessError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::Store(broker) => broker.into(),
            SchemaError::Storage { context, reason } => HarnessError::Storage { context, reason },
            other => HarnessError::Unavailable {
                service: "schema-registry".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl SchemaError {
    /// Confluent-compatible error code reported in REST error bodies.
    pub fn error_code(&self) -> u32 {
        match self {
            SchemaError::SubjectNotFound { .. } => 40401,
            SchemaError::VersionNotFound { .. } => 40402,
            SchemaError::SchemaNotFound { .. } => 40403,
            SchemaError::InvalidSchema { .. } => 42201,
            SchemaError::InvalidVersion { .. } => 42202,
            SchemaError::InvalidCompatibilityLevel { .. } => 42203,
            SchemaError::Store(_) | SchemaError::Storage { .. } => 50001,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SchemaError::SubjectNotFound { .. }
                | SchemaError::VersionNotFound { .. }
                | SchemaError::SchemaNotFound { .. }
        )
    }

    pub fn invalid_schema(reason: impl fmt::Display) -> Self {
        SchemaError::InvalidSchema {
            reason: reason.to_string(),
        }
    }

    pub fn from_serialization_error(e: impl fmt::Display, context: &str) -> Self {
        SchemaError::Storage {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }
}
