//! In-memory znode store.

use parking_lot::RwLock;

use crate::{
    error::CoordinationError,
    store::{
        r#trait::ZNodeStore,
        tree::{Stat, ZNodeTree},
    },
};

/// Keeps the whole tree behind a read/write lock; nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryZNodeStore {
    tree: RwLock<ZNodeTree>,
}

impl InMemoryZNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing tree, e.g. a loaded snapshot.
    pub fn from_tree(tree: ZNodeTree) -> Self {
        Self {
            tree: RwLock::new(tree),
        }
    }

    /// A copy of the current tree.
    pub fn snapshot(&self) -> ZNodeTree {
        self.tree.read().clone()
    }
}

impl ZNodeStore for InMemoryZNodeStore {
    fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        make_parents: bool,
    ) -> Result<String, CoordinationError> {
        self.tree.write().create(path, data, make_parents)
    }

    fn get_data(&self, path: &str) -> Result<(Vec<u8>, Stat), CoordinationError> {
        self.tree.read().get_data(path)
    }

    fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_version: i64,
    ) -> Result<Stat, CoordinationError> {
        self.tree.write().set_data(path, data, expected_version)
    }

    fn exists(&self, path: &str) -> Result<Option<Stat>, CoordinationError> {
        self.tree.read().exists(path)
    }

    fn get_children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        self.tree.read().children(path)
    }

    fn delete(&self, path: &str, expected_version: i64) -> Result<(), CoordinationError> {
        self.tree.write().delete(path, expected_version)
    }

    fn node_count(&self) -> usize {
        self.tree.read().len()
    }
}
