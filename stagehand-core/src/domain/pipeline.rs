//! Pipeline run domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::health::HealthCheckResult;
use crate::domain::stage::{StageName, StageResult, StageStatus};

/// Refused status change of a [`PipelineRun`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Run {run_id} already finished as {status}")]
    AlreadyFinished { run_id: Uuid, status: RunStatus },

    #[error("{0} is not a terminal status")]
    NotTerminal(RunStatus),
}

/// What started a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Push to a branch
    Branch { name: String },
    /// Pull request validation
    PullRequest {
        number: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
    },
    /// Scheduled validation run
    Schedule,
    /// Operator-initiated rollback
    Manual,
}

impl Trigger {
    /// Stages executed for this trigger, in order
    ///
    /// Only push triggers reach the mutating stages. Pull requests and
    /// scheduled runs stop after the security scan.
    pub fn stage_plan(&self) -> &'static [StageName] {
        match self {
            Trigger::Branch { .. } => &StageName::ALL,
            Trigger::PullRequest { .. } | Trigger::Schedule => &StageName::VALIDATION,
            Trigger::Manual => &[],
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Branch { name } => write!(f, "push to {}", name),
            Trigger::PullRequest { number, .. } => write!(f, "pull request #{}", number),
            Trigger::Schedule => write!(f, "schedule"),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

/// Pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
    RolledBack,
    RollbackFailed,
}

impl RunStatus {
    /// Whether the run can no longer change
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failed | RunStatus::RolledBack | RunStatus::RollbackFailed
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "Pending"),
            RunStatus::Running => write!(f, "Running"),
            RunStatus::Success => write!(f, "Success"),
            RunStatus::Failed => write!(f, "Failed"),
            RunStatus::RolledBack => write!(f, "RolledBack"),
            RunStatus::RollbackFailed => write!(f, "RollbackFailed"),
        }
    }
}

/// Outcome of a rollback attempt, kept inside the run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub backup_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub succeeded: bool,
    pub error: Option<String>,
    #[serde(default)]
    pub health: Vec<HealthCheckResult>,
}

/// A single execution of the release pipeline against one environment
///
/// Created at trigger time and mutated only by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub trigger: Trigger,
    pub environment: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub stages: Vec<StageResult>,
    /// Backup taken by the deploy stage of this run
    #[serde(default)]
    pub backup_id: Option<Uuid>,
    #[serde(default)]
    pub rollback: Option<RollbackRecord>,
}

impl PipelineRun {
    /// Creates a pending run
    pub fn new(trigger: Trigger, environment: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            environment: environment.into(),
            started_at: Utc::now(),
            ended_at: None,
            status: RunStatus::Pending,
            stages: Vec::new(),
            backup_id: None,
            rollback: None,
        }
    }

    /// Looks up the result recorded for a stage
    pub fn stage(&self, name: StageName) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Records a stage result
    ///
    /// Replaces the entry for the same stage if one exists, otherwise appends.
    pub fn upsert_stage(&mut self, result: StageResult) {
        match self.stages.iter_mut().find(|s| s.name == result.name) {
            Some(existing) => *existing = result,
            None => self.stages.push(result),
        }
    }

    /// First stage that failed, if any
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.status == StageStatus::Failed)
    }

    /// Whether the deploy stage was started, meaning live files may have changed
    pub fn deploy_reached(&self) -> bool {
        self.stage(StageName::Deploy).is_some_and(|s| {
            matches!(
                s.status,
                StageStatus::Running | StageStatus::Failed | StageStatus::Success
            )
        })
    }

    /// Moves the run to a terminal status
    ///
    /// A run that already finished keeps its status and end time.
    pub fn finish(&mut self, status: RunStatus) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::AlreadyFinished {
                run_id: self.id,
                status: self.status,
            });
        }
        if !status.is_terminal() {
            return Err(TransitionError::NotTerminal(status));
        }

        self.status = status;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Whether the run ended in a state that needs an operator
    pub fn requires_attention(&self) -> bool {
        self.status == RunStatus::RollbackFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_plan_by_trigger() {
        let push = Trigger::Branch {
            name: "main".to_string(),
        };
        assert_eq!(push.stage_plan().len(), 5);
        assert_eq!(push.stage_plan().last(), Some(&StageName::Verify));

        let pr = Trigger::PullRequest {
            number: 7,
            branch: None,
        };
        assert_eq!(
            pr.stage_plan(),
            &[StageName::Test, StageName::Build, StageName::Security]
        );
        assert_eq!(Trigger::Schedule.stage_plan(), pr.stage_plan());
        assert!(Trigger::Manual.stage_plan().is_empty());
    }

    #[test]
    fn test_upsert_stage_keeps_order() {
        let mut run = PipelineRun::new(Trigger::Schedule, "staging");
        run.upsert_stage(StageResult::running(StageName::Test));
        run.upsert_stage(StageResult::running(StageName::Build));

        let mut done = StageResult::running(StageName::Test);
        done.status = StageStatus::Success;
        run.upsert_stage(done);

        assert_eq!(run.stages.len(), 2);
        assert_eq!(run.stages[0].name, StageName::Test);
        assert_eq!(run.stages[0].status, StageStatus::Success);
        assert_eq!(run.stages[1].name, StageName::Build);
    }

    #[test]
    fn test_deploy_reached() {
        let mut run = PipelineRun::new(
            Trigger::Branch {
                name: "main".to_string(),
            },
            "production",
        );
        assert!(!run.deploy_reached());

        run.upsert_stage(StageResult::running(StageName::Security));
        assert!(!run.deploy_reached());

        run.upsert_stage(StageResult::running(StageName::Deploy));
        assert!(run.deploy_reached());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::RollbackFailed.is_terminal());
    }

    #[test]
    fn test_finished_run_is_immutable() {
        let mut run = PipelineRun::new(Trigger::Schedule, "staging");
        assert_eq!(
            run.finish(RunStatus::Running),
            Err(TransitionError::NotTerminal(RunStatus::Running))
        );
        assert!(run.ended_at.is_none());

        run.finish(RunStatus::RolledBack).unwrap();
        let ended_at = run.ended_at;

        assert_eq!(
            run.finish(RunStatus::Success),
            Err(TransitionError::AlreadyFinished {
                run_id: run.id,
                status: RunStatus::RolledBack,
            })
        );
        assert_eq!(run.status, RunStatus::RolledBack);
        assert_eq!(run.ended_at, ended_at);
    }

    #[test]
    fn test_trigger_serialization() {
        let trigger = Trigger::PullRequest {
            number: 42,
            branch: Some("feature/x".to_string()),
        };
        let json = serde_json::to_value(&trigger).unwrap();
        assert_eq!(json["kind"], "pull_request");
        assert_eq!(json["number"], 42);

        let back: Trigger = serde_json::from_value(json).unwrap();
        assert_eq!(back, trigger);
    }
}
