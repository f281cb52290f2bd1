//! Stage domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Test,
    Build,
    Security,
    Deploy,
    Verify,
}

impl StageName {
    /// Full plan for push-style triggers
    pub const ALL: [StageName; 5] = [
        StageName::Test,
        StageName::Build,
        StageName::Security,
        StageName::Deploy,
        StageName::Verify,
    ];

    /// Side-effect-free prefix
    pub const VALIDATION: [StageName; 3] = [StageName::Test, StageName::Build, StageName::Security];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Test => "test",
            StageName::Build => "build",
            StageName::Security => "security",
            StageName::Deploy => "deploy",
            StageName::Verify => "verify",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
}

/// Result of one stage of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub name: StageName,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub log_lines: Vec<String>,
    pub error: Option<String>,
}

impl StageResult {
    /// A stage that has just started
    pub fn running(name: StageName) -> Self {
        Self {
            name,
            status: StageStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            log_lines: Vec::new(),
            error: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == StageStatus::Failed
    }

    /// Marks a stage that never finished as failed
    pub fn interrupt(&mut self, reason: impl Into<String>) {
        if self.status == StageStatus::Running || self.status == StageStatus::Pending {
            self.status = StageStatus::Failed;
            self.ended_at = Some(Utc::now());
            self.error = Some(reason.into());
        }
    }
}
