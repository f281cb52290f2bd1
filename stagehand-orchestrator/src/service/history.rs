//! History Service
//!
//! Moves finished runs from the busy map into the bounded history.

use stagehand_core::domain::pipeline::PipelineRun;
use std::sync::Arc;

use crate::repository::{StateError, StateRepository};

pub struct HistorySink {
    state: Arc<StateRepository>,
    limit: usize,
}

impl HistorySink {
    pub fn new(state: Arc<StateRepository>, limit: usize) -> Self {
        Self { state, limit }
    }

    /// Records a terminal run and releases its environment
    ///
    /// The busy marker is only cleared if it still belongs to this run.
    pub fn record(&self, run: &PipelineRun) -> Result<(), StateError> {
        self.state.update(|state| {
            let owned = state
                .active_run(&run.environment)
                .is_some_and(|active| active.run.id == run.id);
            if owned {
                state.active.remove(&run.environment);
            }
            state.push_history(run.clone(), self.limit);
            Ok::<_, StateError>(())
        })?;

        tracing::debug!("Run {} recorded in history", run.id);
        Ok(())
    }

    /// Clears the run's busy marker without recording it
    ///
    /// Returns whether a marker belonging to the run was removed.
    pub fn release(&self, run: &PipelineRun) -> Result<bool, StateError> {
        self.state.update(|state| {
            let owned = state
                .active_run(&run.environment)
                .is_some_and(|active| active.run.id == run.id);
            if owned {
                state.active.remove(&run.environment);
            }
            Ok::<_, StateError>(owned)
        })
    }

    /// Finished runs, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<PipelineRun>, StateError> {
        Ok(self.state.load()?.recent(limit))
    }
}
