//! File-backed znode store.

use std::path::{Path, PathBuf};

use log::{debug, info};
use parking_lot::RwLock;

use crate::{
    error::CoordinationError,
    store::{
        r#trait::ZNodeStore,
        tree::{Stat, ZNodeTree},
    },
};

const SNAPSHOT_DIR: &str = "version-2";
const SNAPSHOT_FILE: &str = "snapshot.json";

/// In-memory tree mirrored to a JSON snapshot under `<data_dir>/version-2/`.
///
/// The snapshot is rewritten after every mutation through a temporary file and a
/// rename, so a reader of the directory sees either the old or the new tree. A
/// mutation whose snapshot cannot be written is not applied.
#[derive(Debug)]
pub struct FileZNodeStore {
    tree: RwLock<ZNodeTree>,
    snapshot_path: PathBuf,
}

impl FileZNodeStore {
    /// Opens the store in `data_dir`, loading an existing snapshot if present.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self, CoordinationError> {
        let snapshot_dir = data_dir.as_ref().join(SNAPSHOT_DIR);
        std::fs::create_dir_all(&snapshot_dir)
            .map_err(|e| CoordinationError::from_io_error(e, "create snapshot directory"))?;

        let snapshot_path = snapshot_dir.join(SNAPSHOT_FILE);
        let tree = Self::load_snapshot(&snapshot_path)?;
        info!(
            "Opened znode store at {} ({} nodes)",
            snapshot_path.display(),
            tree.len()
        );

        let store = Self {
            tree: RwLock::new(tree),
            snapshot_path,
        };
        store.persist(&store.tree.read())?;
        Ok(store)
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    fn load_snapshot(path: &Path) -> Result<ZNodeTree, CoordinationError> {
        if !path.exists() {
            debug!("No snapshot at {}, starting empty", path.display());
            return Ok(ZNodeTree::new());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| CoordinationError::from_io_error(e, "read snapshot"))?;
        if content.trim().is_empty() {
            return Ok(ZNodeTree::new());
        }

        serde_json::from_str(&content)
            .map_err(|e| CoordinationError::from_parse_error(e, "parse snapshot"))
    }

    fn persist(&self, tree: &ZNodeTree) -> Result<(), CoordinationError> {
        let content = serde_json::to_vec(tree)
            .map_err(|e| CoordinationError::from_parse_error(e, "serialize snapshot"))?;

        let tmp_path = self.snapshot_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)
            .map_err(|e| CoordinationError::from_io_error(e, "write snapshot"))?;
        std::fs::rename(&tmp_path, &self.snapshot_path)
            .map_err(|e| CoordinationError::from_io_error(e, "replace snapshot"))?;

        debug!("Persisted {} nodes to {}", tree.len(), self.snapshot_path.display());
        Ok(())
    }

    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut ZNodeTree) -> Result<T, CoordinationError>,
    ) -> Result<T, CoordinationError> {
        let mut guard = self.tree.write();
        let mut next = guard.clone();
        let result = op(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(result)
    }
}

impl ZNodeStore for FileZNodeStore {
    fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        make_parents: bool,
    ) -> Result<String, CoordinationError> {
        self.mutate(|tree| tree.create(path, data, make_parents))
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
        self.mutate(|tree| tree.set_data(path, data, expected_version))
    }

    fn exists(&self, path: &str) -> Result<Option<Stat>, CoordinationError> {
        self.tree.read().exists(path)
    }

    fn get_children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        self.tree.read().children(path)
    }

    fn delete(&self, path: &str, expected_version: i64) -> Result<(), CoordinationError> {
        self.mutate(|tree| tree.delete(path, expected_version))
    }

    fn node_count(&self) -> usize {
        self.tree.read().len()
    }
}
