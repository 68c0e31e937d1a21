//! Znode store trait definition.

use crate::{error::CoordinationError, store::tree::Stat};

/// Storage behind the coordination service.
///
/// Every mutation is atomic with respect to concurrent callers: a reader never
/// observes a half-applied `create` with `make_parents`.
pub trait ZNodeStore: Send + Sync + std::fmt::Debug {
    /// Creates `path` with `data` and returns the created path. Missing
    /// ancestors are created empty when `make_parents` is set, otherwise the
    /// call fails with `NoNode` naming the first missing ancestor.
    fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        make_parents: bool,
    ) -> Result<String, CoordinationError>;

    fn get_data(&self, path: &str) -> Result<(Vec<u8>, Stat), CoordinationError>;

    /// Replaces the data of `path` if its version matches `expected_version`
    /// (`-1` matches any) and returns the new stat.
    fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_version: i64,
    ) -> Result<Stat, CoordinationError>;

    fn exists(&self, path: &str) -> Result<Option<Stat>, CoordinationError>;

    /// Sorted names of the direct children of `path`.
    fn get_children(&self, path: &str) -> Result<Vec<String>, CoordinationError>;

    /// Removes a childless node whose version matches `expected_version`.
    fn delete(&self, path: &str, expected_version: i64) -> Result<(), CoordinationError>;

    /// Total number of nodes, root included.
    fn node_count(&self) -> usize;
}
