//! Znode store implementations and backends.

pub mod backend;
pub mod file;
pub mod memory;
pub mod r#trait;
pub mod tree;

// Re-exports for ergonomics
pub use backend::StoreBackend;
pub use file::FileZNodeStore;
pub use memory::InMemoryZNodeStore;
pub use r#trait::ZNodeStore;
pub use tree::{Stat, ZNodeTree};
