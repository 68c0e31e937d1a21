//! Single-node message broker for the embedded cluster.
//!
//! The broker registers under `/brokers/ids` in the coordination service, serves
//! every topic whose assignment under `/brokers/topics` it can decode, and stores
//! each partition as an append-only segment in its log directory. Clients speak
//! gRPC through [`BrokerClient`].

pub mod admin;
pub mod client;
pub mod config;
pub mod embedded;
pub mod error;
pub mod log;
pub mod partitioner;
pub mod server;
pub mod service;
pub mod topics;
pub mod types;

pub use admin::{AdminSession, RackAwareMode};
pub use client::BrokerClient;
pub use config::{BrokerConfig, effective_broker_config, packaged_defaults};
pub use embedded::BrokerEmbedded;
pub use error::BrokerError;
pub use server::BrokerServer;
pub use service::BrokerService;
pub use topics::{TopicRegistry, TopicState};
pub use types::{
    BrokerInfo, ClusterMetadata, FetchResult, PartitionMetadata, ProduceResult, TopicMetadata,
};

// Re-export logging macros for consistent usage across the crate
pub use ::log::{debug, error, info, trace, warn};
