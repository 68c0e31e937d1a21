//! Uniquely named temporary directories owned by embedded services.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::debug;
use crate::error::HarnessError;

/// A temporary directory with a random suffix, removed by [`ScratchDir::remove`]
/// (or on drop, if the owner never got that far).
#[derive(Debug)]
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Creates `<system temp dir>/<prefix><random suffix>`.
    pub fn create(prefix: &str) -> Result<Self, HarnessError> {
        Self::create_in(std::env::temp_dir(), prefix)
    }

    pub fn create_in<P: AsRef<Path>>(parent: P, prefix: &str) -> Result<Self, HarnessError> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(parent)
            .map_err(|e| HarnessError::from_io_error(e, "create scratch directory"))?;
        debug!("Created scratch directory {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn to_path_buf(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Recursively deletes the directory, reporting any failure.
    pub fn remove(self) -> Result<(), HarnessError> {
        let path = self.to_path_buf();
        self.dir
            .close()
            .map_err(|e| HarnessError::from_io_error(e, &format!("remove {}", path.display())))?;
        debug!("Removed scratch directory {}", path.display());
        Ok(())
    }
}
