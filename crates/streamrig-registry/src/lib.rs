//! Embedded schema registry for the streamrig cluster.
//!
//! Schemas, subjects and compatibility settings live in a compacted broker topic
//! and are served through a Confluent-compatible REST API.

pub mod api;
pub mod compatibility;
pub mod embedded;
pub mod error;
pub mod records;
pub mod store;

pub use compatibility::CompatibilityLevel;
pub use embedded::{DEFAULT_STORAGE_TOPIC, RegistryEmbedded};
pub use error::SchemaError;
pub use store::{SchemaStore, SchemaVersion};

pub use log::{debug, error, info, trace, warn};
