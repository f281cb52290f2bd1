//! Orchestrator errors
//!
//! Only conditions that prevent a run from being recorded are errors. Stage
//! failures and rollback failures are outcomes stored in the run itself.

use stagehand_core::domain::pipeline::TransitionError;
use stagehand_runner::SnapshotError;
use thiserror::Error;
use uuid::Uuid;

use crate::repository::StateError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Another run holds the environment
    #[error("Environment '{environment}' is busy with run {run_id}")]
    ConcurrentRun { environment: String, run_id: Uuid },

    #[error("Unknown environment '{0}'")]
    UnknownEnvironment(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl OrchestratorError {
    /// Whether the request was refused before anything ran
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ConcurrentRun { .. } | OrchestratorError::UnknownEnvironment(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
