//! Backup domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A restorable copy of an environment's live files
///
/// Taken immediately before the deploy stage mutates anything.
/// Never edited after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub id: Uuid,
    pub pipeline_run_id: Uuid,
    pub environment: String,
    pub created_at: DateTime<Utc>,
    /// Captured paths, relative to the live directory
    pub manifest: Vec<String>,
    /// Configured paths that did not exist at capture time
    #[serde(default)]
    pub absent: Vec<String>,
    /// Version that was live when the backup was taken
    #[serde(default)]
    pub applied_version: Option<String>,
}
