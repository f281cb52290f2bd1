//! Backup DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::backup::Backup;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSummary {
    pub id: Uuid,
    pub environment: String,
    pub pipeline_run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub paths: usize,
}

impl From<&Backup> for BackupSummary {
    fn from(backup: &Backup) -> Self {
        Self {
            id: backup.id,
            environment: backup.environment.clone(),
            pipeline_run_id: backup.pipeline_run_id,
            created_at: backup.created_at,
            paths: backup.manifest.len(),
        }
    }
}
