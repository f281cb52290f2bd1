//! Status report DTOs

use serde::{Deserialize, Serialize};

use crate::dto::backup::BackupSummary;
use crate::dto::run::RunSummary;

/// Active run together with the liveness of its owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveRunSummary {
    pub owner_pid: u32,
    /// False when the owning process is gone and the run awaits recovery
    pub owner_alive: bool,
    pub run: RunSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentStatus {
    pub name: String,
    pub active: Option<ActiveRunSummary>,
    pub latest_run: Option<RunSummary>,
    pub app_running: bool,
    pub backups: usize,
    pub latest_backup: Option<BackupSummary>,
}

/// Output of `stagehand status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub environments: Vec<EnvironmentStatus>,
    pub requires_attention: bool,
}

impl StatusReport {
    pub fn new(environments: Vec<EnvironmentStatus>) -> Self {
        let requires_attention = environments
            .iter()
            .any(|e| e.latest_run.as_ref().is_some_and(|r| r.requires_attention));
        Self {
            environments,
            requires_attention,
        }
    }
}
