//! State Repository
//!
//! Reads and writes `state.json` (the [`DeploymentState`]). Every mutation is a
//! read-modify-write holding `state.json.lock` followed by an atomic rename,
//! so the busy-marker check and its update cannot interleave, even between
//! separate `stagehand` processes.

use parking_lot::Mutex;
use stagehand_core::domain::state::DeploymentState;
use stagehand_runner::fsutil::{self, FileLock};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("State file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StateError>;

pub struct StateRepository {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StateRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current state; a missing file is an empty state
    pub fn load(&self) -> Result<DeploymentState> {
        let _guard = self.lock.lock();
        let _file_lock = self.file_lock()?;
        self.read()
    }

    /// Applies `f` to the current state and persists the result
    ///
    /// Nothing is written when `f` returns an error.
    pub fn update<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut DeploymentState) -> std::result::Result<T, E>,
        E: From<StateError>,
    {
        let _guard = self.lock.lock();
        let _file_lock = self.file_lock()?;
        let mut state = self.read()?;
        let out = f(&mut state)?;
        self.write(&state)?;
        Ok(out)
    }

    fn file_lock(&self) -> Result<FileLock> {
        FileLock::acquire(&self.path).map_err(|source| StateError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn read(&self) -> Result<DeploymentState> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DeploymentState::default()),
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_slice(&bytes).map_err(|source| StateError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, state: &DeploymentState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state).map_err(StateError::Serialize)?;
        fsutil::write_atomic(&self.path, &json).map_err(|source| StateError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::domain::pipeline::{PipelineRun, Trigger};
    use stagehand_core::domain::state::ActiveRun;
    use std::sync::{Arc, Barrier};
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = tempdir().unwrap();
        let repo = StateRepository::new(dir.path().join("state.json"));
        let state = repo.load().unwrap();
        assert!(state.active.is_empty());
        assert!(state.history.is_empty());
    }

    #[test]
    fn test_update_persists() {
        let dir = tempdir().unwrap();
        let repo = StateRepository::new(dir.path().join("nested/state.json"));
        let run = PipelineRun::new(Trigger::Schedule, "staging");

        repo.update(|state| {
            state.active.insert(
                "staging".to_string(),
                ActiveRun {
                    owner_pid: 42,
                    run: run.clone(),
                },
            );
            Ok::<_, StateError>(())
        })
        .unwrap();

        let reloaded = StateRepository::new(dir.path().join("nested/state.json"))
            .load()
            .unwrap();
        assert_eq!(reloaded.active_run("staging").unwrap().run.id, run.id);
    }

    #[derive(Debug)]
    enum TestError {
        Rejected,
        State,
    }

    impl From<StateError> for TestError {
        fn from(_: StateError) -> Self {
            TestError::State
        }
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let dir = tempdir().unwrap();
        let repo = StateRepository::new(dir.path().join("state.json"));

        let result: std::result::Result<(), TestError> = repo.update(|state| {
            state.push_history(PipelineRun::new(Trigger::Schedule, "staging"), 10);
            Err(TestError::Rejected)
        });

        assert!(matches!(result, Err(TestError::Rejected)));
        assert!(!repo.path().exists());
    }

    #[test]
    fn test_only_one_repository_takes_the_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let start = Arc::new(Barrier::new(4));

        let contenders: Vec<_> = (0..4)
            .map(|pid| {
                let path = path.clone();
                let start = Arc::clone(&start);
                std::thread::spawn(move || {
                    let repo = StateRepository::new(path);
                    start.wait();
                    repo.update(|state| {
                        if state.active_run("production").is_some() {
                            return Ok::<_, StateError>(false);
                        }
                        // Widen the window between the check and the insert
                        std::thread::sleep(Duration::from_millis(50));
                        state.active.insert(
                            "production".to_string(),
                            ActiveRun {
                                owner_pid: pid,
                                run: PipelineRun::new(Trigger::Schedule, "production"),
                            },
                        );
                        Ok(true)
                    })
                    .unwrap()
                })
            })
            .collect();

        let winners = contenders
            .into_iter()
            .map(|c| c.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);

        let state = StateRepository::new(&path).load().unwrap();
        assert_eq!(state.active.len(), 1);
    }

    #[test]
    fn test_corrupt_state_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = StateRepository::new(&path).load().unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }
}
