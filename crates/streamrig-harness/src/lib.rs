//! A single-node cluster for integration tests: a coordination service, one
//! broker, and a schema registry, started and stopped as a unit.

pub mod cluster;

pub use cluster::{
    ClusterHarness, SCHEMA_REGISTRY_COMPATIBILITY, SCHEMA_REGISTRY_TOPIC, broker_overrides,
};

pub use log::{debug, error, info, trace, warn};
