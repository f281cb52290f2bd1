//! Backup catalog
//!
//! JSON list of every selectable backup. An entry is only written after its
//! directory is complete, so anything listed here can be restored.

use stagehand_core::domain::backup::Backup;
use std::io;
use std::path::{Path, PathBuf};

use crate::fsutil;

#[derive(Debug, Clone)]
pub struct BackupCatalog {
    path: PathBuf,
}

impl BackupCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Takes the catalog's cross-process lock for a read-modify-write
    pub fn lock(&self) -> io::Result<fsutil::FileLock> {
        fsutil::FileLock::acquire(&self.path)
    }

    /// Reads all entries; a missing catalog is empty
    pub fn load(&self) -> io::Result<Vec<Backup>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, entries: &[Backup]) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fsutil::write_atomic(&self.path, &json)
    }
}
