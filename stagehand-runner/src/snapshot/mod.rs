//! Snapshot store
//!
//! Creates, lists, prunes and restores versioned backups of an environment's
//! live files:
//! - Each backup lives in `backups/<environment>/<backup_id>/`
//! - The catalog (`backups.json`) lists only fully written backups
//! - A backup that fails partway is deleted before the error is returned
//! - Restoring is idempotent
//! - Catalog updates hold `backups.json.lock`, so concurrent stores on one
//!   state directory never lose each other's entries

mod backend;
mod catalog;

pub use backend::{CopyBackend, SnapshotBackend};
pub use catalog::BackupCatalog;

use chrono::Utc;
use parking_lot::Mutex;
use stagehand_core::config::Settings;
use stagehand_core::domain::backup::Backup;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::fsutil;

#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Backup creation failed; nothing was added to the catalog
    #[error("Backup of '{environment}' failed: {message}")]
    Backup {
        environment: String,
        message: String,
    },

    #[error("No backup available for environment '{0}'")]
    NoBackupAvailable(String),

    /// Restore failed partway; live files are in an undefined state
    #[error("Restore of backup {backup_id} failed: {message}")]
    Restore { backup_id: Uuid, message: String },

    #[error("Backup catalog error: {0}")]
    Catalog(#[source] io::Error),

    #[error("Unknown environment '{0}'")]
    UnknownEnvironment(String),

    #[error("Snapshot task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Backup catalog plus the files behind it
pub struct SnapshotStore {
    root: PathBuf,
    catalog: BackupCatalog,
    backend: Arc<dyn SnapshotBackend>,
    /// Environment name -> live directory
    environments: BTreeMap<String, PathBuf>,
    /// Paths captured by every backup, relative to the live directory
    paths: Vec<String>,
    /// Serializes catalog read-modify-write cycles between threads; the
    /// catalog's lock file does the same between processes
    lock: Mutex<()>,
}

impl SnapshotStore {
    /// Creates a store using plain recursive copies
    pub fn new(settings: &Settings) -> Self {
        Self::with_backend(settings, Arc::new(CopyBackend))
    }

    pub fn with_backend(settings: &Settings, backend: Arc<dyn SnapshotBackend>) -> Self {
        let root = settings.backups_dir();
        let catalog = BackupCatalog::new(settings.state_dir.join("backups.json"));
        let environments = settings
            .environments
            .iter()
            .map(|(name, env)| (name.clone(), env.live_dir.clone()))
            .collect();

        Self {
            root,
            catalog,
            backend,
            environments,
            paths: settings.snapshot_paths(),
            lock: Mutex::new(()),
        }
    }

    /// Directory holding a backup's files
    pub fn backup_dir(&self, backup: &Backup) -> PathBuf {
        self.root
            .join(&backup.environment)
            .join(backup.id.to_string())
    }

    fn live_dir(&self, environment: &str) -> Result<&Path> {
        self.environments
            .get(environment)
            .map(PathBuf::as_path)
            .ok_or_else(|| SnapshotError::UnknownEnvironment(environment.to_string()))
    }

    /// Copies the configured paths of an environment into a new backup
    pub fn create(&self, pipeline_run_id: Uuid, environment: &str) -> Result<Backup> {
        let live_dir = self.live_dir(environment)?.to_path_buf();
        let id = Uuid::new_v4();
        let dir = self.root.join(environment).join(id.to_string());

        info!(
            "Creating backup {} of {} ({})",
            id,
            environment,
            live_dir.display()
        );

        let (manifest, absent) = match self.capture_all(&live_dir, &dir) {
            Ok(captured) => captured,
            Err(e) => {
                self.discard_partial(&dir);
                return Err(SnapshotError::Backup {
                    environment: environment.to_string(),
                    message: e,
                });
            }
        };

        let backup = Backup {
            id,
            pipeline_run_id,
            environment: environment.to_string(),
            created_at: Utc::now(),
            manifest,
            absent,
            applied_version: detect_version(&live_dir),
        };

        let _guard = self.lock.lock();
        let registered = self.catalog.lock().and_then(|_file_lock| {
            let mut entries = self.catalog.load()?;
            entries.push(backup.clone());
            self.catalog.save(&entries)
        });

        if let Err(e) = registered {
            self.discard_partial(&dir);
            return Err(SnapshotError::Backup {
                environment: environment.to_string(),
                message: format!("failed to register backup in catalog: {}", e),
            });
        }

        info!(
            "Backup {} created with {} path(s), {} absent",
            backup.id,
            backup.manifest.len(),
            backup.absent.len()
        );
        Ok(backup)
    }

    fn capture_all(
        &self,
        live_dir: &Path,
        dir: &Path,
    ) -> std::result::Result<(Vec<String>, Vec<String>), String> {
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("failed to create {}: {}", dir.display(), e))?;

        let mut manifest = Vec::new();
        let mut absent = Vec::new();

        for rel in &self.paths {
            if !fsutil::exists(&live_dir.join(rel)) {
                debug!("Path {} not present, recording as absent", rel);
                absent.push(rel.clone());
                continue;
            }

            self.backend
                .capture(live_dir, dir, Path::new(rel))
                .map_err(|e| format!("failed to copy {}: {}", rel, e))?;
            manifest.push(rel.clone());
        }

        Ok((manifest, absent))
    }

    fn discard_partial(&self, dir: &Path) {
        if let Err(e) = self.backend.discard(dir) {
            warn!(
                "Failed to delete partial backup {}: {}",
                dir.display(),
                e
            );
        }
    }

    /// Restores the most recent backup of an environment
    pub fn restore_latest(&self, environment: &str) -> Result<Backup> {
        let backup = self
            .latest(environment)?
            .ok_or_else(|| SnapshotError::NoBackupAvailable(environment.to_string()))?;

        self.restore(&backup)?;
        Ok(backup)
    }

    /// Makes the live files match a backup
    ///
    /// Every manifest path is deleted and copied back from the backup; every
    /// path that was absent at capture time is deleted.
    pub fn restore(&self, backup: &Backup) -> Result<()> {
        let live_dir = self.live_dir(&backup.environment)?;
        let dir = self.backup_dir(backup);
        let restore_err = |message: String| SnapshotError::Restore {
            backup_id: backup.id,
            message,
        };

        if !dir.is_dir() {
            return Err(restore_err(format!(
                "backup directory {} is missing",
                dir.display()
            )));
        }

        info!(
            "Restoring backup {} into {}",
            backup.id,
            live_dir.display()
        );

        std::fs::create_dir_all(live_dir)
            .map_err(|e| restore_err(format!("failed to create live directory: {}", e)))?;

        for rel in &backup.manifest {
            self.backend
                .restore_path(&dir, live_dir, Path::new(rel))
                .map_err(|e| restore_err(format!("failed to restore {}: {}", rel, e)))?;
        }

        for rel in &backup.absent {
            fsutil::remove_path(&live_dir.join(rel))
                .map_err(|e| restore_err(format!("failed to remove {}: {}", rel, e)))?;
        }

        info!("Backup {} restored", backup.id);
        Ok(())
    }

    /// Deletes all but the `keep` most recent backups of an environment
    ///
    /// A catalog entry is removed only after its directory is gone.
    pub fn prune(&self, environment: &str, keep: usize) -> Result<Vec<Backup>> {
        let _guard = self.lock.lock();
        let _file_lock = self.catalog.lock().map_err(SnapshotError::Catalog)?;
        let mut entries = self.catalog.load().map_err(SnapshotError::Catalog)?;

        let expired: Vec<Backup> = newest_first(&entries, environment)
            .into_iter()
            .skip(keep)
            .cloned()
            .collect();

        let mut removed = Vec::new();
        for backup in expired {
            if let Err(e) = self.backend.discard(&self.backup_dir(&backup)) {
                warn!("Failed to delete backup {}: {}", backup.id, e);
                continue;
            }

            entries.retain(|b| b.id != backup.id);
            self.catalog.save(&entries).map_err(SnapshotError::Catalog)?;
            debug!("Pruned backup {}", backup.id);
            removed.push(backup);
        }

        if !removed.is_empty() {
            info!(
                "Pruned {} backup(s) of {}, keeping {}",
                removed.len(),
                environment,
                keep
            );
        }

        Ok(removed)
    }

    /// Backups, newest first, optionally for one environment
    pub fn list(&self, environment: Option<&str>) -> Result<Vec<Backup>> {
        let entries = self.catalog.load().map_err(SnapshotError::Catalog)?;
        let mut selected: Vec<(usize, Backup)> = entries
            .into_iter()
            .enumerate()
            .filter(|(_, b)| environment.is_none_or(|env| b.environment == env))
            .collect();
        selected.sort_by(|(ia, a), (ib, b)| (b.created_at, ib).cmp(&(a.created_at, ia)));
        Ok(selected.into_iter().map(|(_, b)| b).collect())
    }

    pub fn latest(&self, environment: &str) -> Result<Option<Backup>> {
        let entries = self.catalog.load().map_err(SnapshotError::Catalog)?;
        Ok(newest_first(&entries, environment).first().map(|b| (*b).clone()))
    }

    // =============================================================================
    // Blocking-pool wrappers
    // =============================================================================

    /// [`SnapshotStore::create`] on the blocking thread pool
    pub async fn spawn_create(
        self: &Arc<Self>,
        pipeline_run_id: Uuid,
        environment: &str,
    ) -> Result<Backup> {
        let store = Arc::clone(self);
        let environment = environment.to_string();
        off_thread(move || store.create(pipeline_run_id, &environment)).await
    }

    /// [`SnapshotStore::restore_latest`] on the blocking thread pool
    pub async fn spawn_restore_latest(self: &Arc<Self>, environment: &str) -> Result<Backup> {
        let store = Arc::clone(self);
        let environment = environment.to_string();
        off_thread(move || store.restore_latest(&environment)).await
    }

    /// [`SnapshotStore::prune`] on the blocking thread pool
    pub async fn spawn_prune(self: &Arc<Self>, environment: &str, keep: usize) -> Result<Vec<Backup>> {
        let store = Arc::clone(self);
        let environment = environment.to_string();
        off_thread(move || store.prune(&environment, keep)).await
    }
}

/// Backups of one environment, latest `created_at` first, later catalog entries winning ties
fn newest_first<'a>(entries: &'a [Backup], environment: &str) -> Vec<&'a Backup> {
    let mut selected: Vec<(usize, &Backup)> = entries
        .iter()
        .enumerate()
        .filter(|(_, b)| b.environment == environment)
        .collect();
    selected.sort_by(|(ia, a), (ib, b)| (b.created_at, ib).cmp(&(a.created_at, ia)));
    selected.into_iter().map(|(_, b)| b).collect()
}

async fn off_thread<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SnapshotError::Task(e.to_string()))?
}

/// Reads the `version` field of the live `package.json`, if any
fn detect_version(live_dir: &Path) -> Option<String> {
    let raw = std::fs::read(live_dir.join("package.json")).ok()?;
    let manifest: serde_json::Value = serde_json::from_slice(&raw).ok()?;
    manifest
        .get("version")
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}
