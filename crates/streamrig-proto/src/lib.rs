//! Shared Protocol Buffer definitions for streamrig.
//!
//! This crate contains the generated code for both wire protocols spoken inside the
//! embedded cluster: the coordination service API (coordination.proto) and the
//! broker client API (broker.proto).

// Generated protobuf modules via `tonic_build` in build.rs

/// Coordination service protocol
pub mod coordination {
    tonic::include_proto!("streamrig.coordination");
}

/// Broker client protocol
pub mod broker {
    tonic::include_proto!("streamrig.broker");
}

// Re-export client and server types
pub use broker::broker_client::BrokerClient as BrokerGrpcClient;
pub use broker::broker_server::BrokerServer as BrokerGrpcServer;
pub use coordination::coordination_client::CoordinationClient as CoordinationGrpcClient;
pub use coordination::coordination_server::CoordinationServer as CoordinationGrpcServer;
