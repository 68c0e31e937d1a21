//! Store backend selection.

use std::{path::PathBuf, sync::Arc};

use crate::{
    error::CoordinationError,
    store::{file::FileZNodeStore, memory::InMemoryZNodeStore, r#trait::ZNodeStore},
};

#[derive(Debug, Clone, Default)]
pub enum StoreBackend {
    /// Nothing is written to disk.
    #[default]
    Memory,
    /// JSON snapshot inside `data_dir`.
    File { data_dir: PathBuf },
}

impl StoreBackend {
    pub fn new_memory() -> Self {
        StoreBackend::Memory
    }

    pub fn new_file(data_dir: impl Into<PathBuf>) -> Self {
        StoreBackend::File {
            data_dir: data_dir.into(),
        }
    }

    pub fn create(&self) -> Result<Arc<dyn ZNodeStore>, CoordinationError> {
        match self {
            StoreBackend::Memory => Ok(Arc::new(InMemoryZNodeStore::new())),
            StoreBackend::File { data_dir } => Ok(Arc::new(FileZNodeStore::new(data_dir)?)),
        }
    }
}
