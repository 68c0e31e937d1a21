//! Shared building blocks for the streamrig embedded cluster.
//!
//! This crate holds what the coordination service, broker, registry, and harness
//! crates have in common: the error taxonomy, `.properties` configuration and the
//! effective-config merge, lifecycle state, port allocation, scratch directories,
//! and the entry formats stored in the coordination service.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod ports;
pub mod scratch;
pub mod telemetry;
pub mod types;

pub use config::{EmbeddedServiceConfig, Properties, effective_config};
pub use error::{AdminError, HarnessError, ShutdownFailure};
pub use lifecycle::{ServiceHandle, ServiceState};
pub use ports::{LOCALHOST, allocate_port};
pub use scratch::ScratchDir;
pub use types::{Record, StoredRecord, TopicSpec};

// Re-export logging macros for consistent usage across the crate
pub use log::{debug, error, info, trace, warn};
