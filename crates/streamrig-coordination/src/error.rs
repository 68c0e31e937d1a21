//! Error types for coordination operations.

use std::fmt;

use streamrig::HarnessError;

#[derive(Debug, Clone, PartialEq)]
pub enum CoordinationError {
    NoNode {
        path: String,
    },
    NodeExists {
        path: String,
    },
    BadVersion {
        path: String,
        expected: i64,
        actual: i64,
    },
    NotEmpty {
        path: String,
    },
    InvalidPath {
        path: String,
        reason: String,
    },
    /// Entry bytes could not be decoded with the chosen serializer.
    Serialization {
        context: String,
        reason: String,
    },
    /// Snapshot or lock file I/O failed.
    Persistence {
        context: String,
        reason: String,
    },
    Transport {
        context: String,
        reason: String,
    },
}

impl fmt::Display for CoordinationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinationError::NoNode { path } => write!(f, "Node '{path}' does not exist"),
            CoordinationError::NodeExists { path } => write!(f, "Node '{path}' already exists"),
            CoordinationError::BadVersion {
                path,
                expected,
                actual,
            } => write!(
                f,
                "Version mismatch for '{path}': expected {expected}, actual {actual}"
            ),
            CoordinationError::NotEmpty { path } => write!(f, "Node '{path}' has children"),
            CoordinationError::InvalidPath { path, reason } => {
                write!(f, "Invalid path '{path}': {reason}")
            }
            CoordinationError::Serialization { context, reason } => {
                write!(f, "Serialization error in {context}: {reason}")
            }
            CoordinationError::Persistence { context, reason } => {
                write!(f, "Persistence error in {context}: {reason}")
            }
            CoordinationError::Transport { context, reason } => {
                write!(f, "Transport error in {context}: {reason}")
            }
        }
    }
}

impl std::error::Error for CoordinationError {}

impl CoordinationError {
    pub fn is_no_node(&self) -> bool {
        matches!(self, CoordinationError::NoNode { .. })
    }

    pub fn is_node_exists(&self) -> bool {
        matches!(self, CoordinationError::NodeExists { .. })
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CoordinationError::NoNode { .. }
                | CoordinationError::NodeExists { .. }
                | CoordinationError::BadVersion { .. }
                | CoordinationError::NotEmpty { .. }
                | CoordinationError::InvalidPath { .. }
        )
    }

    pub fn invalid_path(path: &str, reason: &str) -> Self {
        CoordinationError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn from_io_error(e: std::io::Error, context: &str) -> Self {
        CoordinationError::Persistence {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn from_parse_error(e: impl fmt::Display, context: &str) -> Self {
        CoordinationError::Serialization {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn from_transport_error(e: impl fmt::Display, context: &str) -> Self {
        CoordinationError::Transport {
            context: context.to_string(),
            reason: e.to_string(),
        }
    }
}

impl From<CoordinationError> for HarnessError {
    fn from(err: CoordinationError) -> Self {
        match err {
            CoordinationError::Transport { context, reason } => {
                HarnessError::Transport { context, reason }
            }
            CoordinationError::Persistence { context, reason } => {
                HarnessError::Storage { context, reason }
            }
            other => HarnessError::Storage {
                context: "coordination".to_string(),
                reason: other.to_string(),
            },
        }
    }
}
