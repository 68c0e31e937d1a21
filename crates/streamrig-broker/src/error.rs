//! Error types for broker operations.

use std::fmt;

use streamrig::{AdminError, HarnessError};
use streamrig_coordination::CoordinationError;

#[derive(Debug, Clone, PartialEq)]
pub enum BrokerError {
    /// The topic is not served by this broker (missing, or its assignment entry
    /// could not be decoded).
    TopicNotFound {
        topic: String,
    },
    PartitionNotFound {
        topic: String,
        partition: u32,
    },
    OffsetOutOfRange {
        topic: String,
        partition: u32,
        offset: u64,
        high_water_mark: u64,
    },
    RecordTooLarge {
        topic: String,
        size: usize,
        max: usize,
    },
    InvalidRequest {
        reason: String,
    },
    Admin(AdminError),
    Coordination(CoordinationError),
    Storage {
        context: String,
        reason: String,
    },
    Transport {
        context: String,
        reason: String,
    },
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::TopicNotFound { topic } => write!(f, "Topic '{topic}' not found"),
            BrokerError::PartitionNotFound { topic, partition } => {
                write!(f, "Partition {partition} not found for topic '{topic}'")
            }
            BrokerError::OffsetOutOfRange {
                topic,
                partition,
                offset,
                high_water_mark,
            } => write!(
                f,
                "Offset {offset} out of range for '{topic}'-{partition} (high water mark {high_water_mark})"
            ),
            BrokerError::RecordTooLarge { topic, size, max } => write!(
                f,
                "Record of {size} bytes exceeds the maximum of {max} bytes for topic '{topic}'"
            ),
            BrokerError::InvalidRequest { reason } => write!(f, "Invalid request: {reason}"),
            BrokerError::Admin(err) => write!(f, "{err}"),
            BrokerError::Coordination(err) => write!(f, "Coordination error: {err}"),
            BrokerError::Storage { context, reason } => {
                write!(f, "Storage error in {context}: {reason}")
            }
            BrokerError::Transport { context, reason } => {
                write!(f, "Transport error in {context}: {reason}")
            }
        }
    }
}

impl std::error::Error for BrokerError {}

impl From<AdminError> for BrokerError {
    fn from(err: AdminError) -> Self {
        BrokerError::Admin(err)
    }
}

impl From<CoordinationError> for BrokerError {
    fn from(err: CoordinationError) -> Self {
        BrokerError::Coordination(err)
    }
}

impl From<BrokerError> for HarnessError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Admin(admin) => HarnessError::Administrative(admin),
            BrokerError::Coordination(coordination) => coordination.into(),
            BrokerError::Storage { context, reason } => HarnessError::Storage { context, reason },
            BrokerError::Transport { context, reason } => {
                HarnessError::Transport { context, reason }
            }
            other => HarnessError::Unavailable {
                service: "broker".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl BrokerError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BrokerError::TopicNotFound { .. } | BrokerError::PartitionNotFound { .. }
        )
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BrokerError::TopicNotFound { .. }
                | BrokerError::PartitionNotFound { .. }
                | BrokerError::OffsetOutOfRange { .. }
                | BrokerError::RecordTooLarge { .. }
                | BrokerError::InvalidRequest { .. }
                | BrokerError::Admin(_)
        )
    }

    pub fn invalid_request(reason: impl Into<String>) -> Self {
        BrokerError::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub fn from_io_error(e: std::io::Error, context: &str) -> Self {
        BrokerError::Storage {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn from_serialization_error(e: impl fmt::Display, context: &str) -> Self {
        BrokerError::Storage {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn from_transport_error(e: impl fmt::Display, context: &str) -> Self {
        BrokerError::Transport {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }
}
