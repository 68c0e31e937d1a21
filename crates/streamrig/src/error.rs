//! Error taxonomy shared by every embedded service and the cluster harness.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lifecycle::ServiceState;

#[derive(Debug, Clone, PartialEq)]
pub enum HarnessError {
    /// The requested listener address could not be bound.
    PortBind {
        addr: String,
        reason: String,
    },
    /// A required setting is missing or malformed.
    Configuration {
        key: String,
        reason: String,
    },
    /// The metadata layer rejected an administrative call.
    Administrative(AdminError),
    /// One or more cleanup steps failed while stopping.
    Shutdown {
        failures: Vec<ShutdownFailure>,
    },
    InvalidTransition {
        service: String,
        from: ServiceState,
        to: ServiceState,
    },
    Transport {
        context: String,
        reason: String,
    },
    Storage {
        context: String,
        reason: String,
    },
    Unavailable {
        service: String,
        reason: String,
    },
}

/// Reasons a topic creation can be rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AdminError {
    TopicAlreadyExists {
        topic: String,
    },
    InvalidTopicName {
        topic: String,
        reason: String,
    },
    InvalidPartitions {
        topic: String,
        partitions: i32,
    },
    InvalidReplicationFactor {
        topic: String,
        requested: i32,
        available_brokers: usize,
    },
    InvalidConfig {
        key: String,
        reason: String,
    },
    RackAwareViolation {
        reason: String,
    },
}

/// A single failed cleanup step, reported as part of [`HarnessError::Shutdown`].
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownFailure {
    pub service: String,
    pub step: String,
    pub reason: String,
}

impl ShutdownFailure {
    pub fn new(service: &str, step: &str, reason: impl fmt::Display) -> Self {
        Self {
            service: service.to_string(),
            step: step.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessError::PortBind { addr, reason } => {
                write!(f, "Failed to bind {addr}: {reason}")
            }
            HarnessError::Configuration { key, reason } => {
                write!(f, "Invalid configuration for '{key}': {reason}")
            }
            HarnessError::Administrative(err) => write!(f, "Administrative operation failed: {err}"),
            HarnessError::Shutdown { failures } => {
                write!(f, "Shutdown completed with {} failure(s)", failures.len())?;
                for failure in failures {
                    write!(f, "; {failure}")?;
                }
                Ok(())
            }
            HarnessError::InvalidTransition { service, from, to } => {
                write!(f, "Invalid lifecycle transition for {service}: {from} -> {to}")
            }
            HarnessError::Transport { context, reason } => {
                write!(f, "Transport error in {context}: {reason}")
            }
            HarnessError::Storage { context, reason } => {
                write!(f, "Storage error in {context}: {reason}")
            }
            HarnessError::Unavailable { service, reason } => {
                write!(f, "{service} unavailable: {reason}")
            }
        }
    }
}

impl fmt::Display for AdminError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminError::TopicAlreadyExists { topic } => {
                write!(f, "Topic '{topic}' already exists")
            }
            AdminError::InvalidTopicName { topic, reason } => {
                write!(f, "Invalid topic name '{topic}': {reason}")
            }
            AdminError::InvalidPartitions { topic, partitions } => {
                write!(
                    f,
                    "Invalid partition count {partitions} for topic '{topic}' (must be at least 1)"
                )
            }
            AdminError::InvalidReplicationFactor {
                topic,
                requested,
                available_brokers,
            } => {
                write!(
                    f,
                    "Replication factor {requested} for topic '{topic}' larger than available brokers: {available_brokers}"
                )
            }
            AdminError::InvalidConfig { key, reason } => {
                write!(f, "Invalid topic config '{key}': {reason}")
            }
            AdminError::RackAwareViolation { reason } => {
                write!(f, "Rack-aware placement not possible: {reason}")
            }
        }
    }
}

impl fmt::Display for ShutdownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed to {}: {}", self.service, self.step, self.reason)
    }
}

impl std::error::Error for HarnessError {}
impl std::error::Error for AdminError {}

impl From<AdminError> for HarnessError {
    fn from(err: AdminError) -> Self {
        HarnessError::Administrative(err)
    }
}

impl HarnessError {
    pub fn is_port_bind(&self) -> bool {
        matches!(self, HarnessError::PortBind { .. })
    }

    pub fn is_administrative(&self) -> bool {
        matches!(self, HarnessError::Administrative(_))
    }

    pub fn from_bind_error(e: std::io::Error, addr: &str) -> Self {
        HarnessError::PortBind {
            addr: addr.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn from_io_error(e: std::io::Error, context: &str) -> Self {
        HarnessError::Storage {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn from_transport_error(e: impl fmt::Display, context: &str) -> Self {
        HarnessError::Transport {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn invalid_setting(key: &str, reason: impl fmt::Display) -> Self {
        HarnessError::Configuration {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Collapses a list of cleanup failures into a result.
    pub fn from_shutdown_failures(failures: Vec<ShutdownFailure>) -> Result<(), HarnessError> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Shutdown { failures })
        }
    }
}
