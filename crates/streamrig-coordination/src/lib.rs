//! Single-node coordination service for the embedded cluster.
//!
//! The service keeps a tree of znodes (path, data, version) and serves it over gRPC.
//! Brokers register themselves under `/brokers/ids`, topic assignments live under
//! `/brokers/topics`, and per-topic config under `/config/topics`.

pub mod client;
pub mod embedded;
pub mod error;
pub mod path;
pub mod serializer;
pub mod server;
pub mod session;
pub mod store;

pub use client::CoordinationClient;
pub use embedded::CoordinationServiceEmbedded;
pub use error::CoordinationError;
pub use serializer::{EntryFormat, EntrySerializer, ObjectStreamSerializer, StringSerializer};
pub use server::CoordinationServer;
pub use session::CoordinationSession;
pub use store::{FileZNodeStore, InMemoryZNodeStore, Stat, StoreBackend, ZNodeStore};

// Re-export logging macros for consistent usage across the crate
pub use log::{debug, error, info, trace, warn};

/// Matches any node version in `set_data` and `delete`.
pub const ANY_VERSION: i64 = -1;
