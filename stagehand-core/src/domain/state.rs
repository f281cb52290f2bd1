//! Deployment state
//!
//! Process-wide record of which environments are busy and what ran recently.
//! Persisted by the orchestrator after every transition, so it is the
//! only source of truth for "is a run currently active".

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::domain::pipeline::PipelineRun;

/// Default number of finished runs kept in history
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Busy marker for one environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveRun {
    /// PID of the process driving the run
    pub owner_pid: u32,
    pub run: PipelineRun,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentState {
    /// Environment name -> run currently holding it
    #[serde(default)]
    pub active: BTreeMap<String, ActiveRun>,
    /// Finished runs, oldest first
    #[serde(default)]
    pub history: VecDeque<PipelineRun>,
}

impl DeploymentState {
    pub fn active_run(&self, environment: &str) -> Option<&ActiveRun> {
        self.active.get(environment)
    }

    /// Appends a finished run, evicting the oldest entries past `limit`
    pub fn push_history(&mut self, run: PipelineRun, limit: usize) {
        self.history.push_back(run);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }

    /// Most recent finished run for an environment
    pub fn latest_for(&self, environment: &str) -> Option<&PipelineRun> {
        self.history
            .iter()
            .rev()
            .find(|r| r.environment == environment)
    }

    /// Finished runs, newest first
    pub fn recent(&self, limit: usize) -> Vec<PipelineRun> {
        self.history.iter().rev().take(limit).cloned().collect()
    }
}
