//! Pipeline run DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::{PipelineRun, RunStatus, Trigger};
use crate::domain::stage::{StageName, StageStatus};

/// Compact stage view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    pub name: StageName,
    pub status: StageStatus,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

/// Rollback view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackSummary {
    pub backup_id: Option<Uuid>,
    pub succeeded: bool,
    pub error: Option<String>,
    pub unhealthy_checks: Vec<String>,
}

/// Run summary printed by `deploy`, `rollback` and `history`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub environment: String,
    pub trigger: Trigger,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub stages: Vec<StageSummary>,
    pub failed_stage: Option<StageName>,
    pub backup_id: Option<Uuid>,
    pub rollback: Option<RollbackSummary>,
    pub requires_attention: bool,
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        Self {
            id: run.id,
            environment: run.environment.clone(),
            trigger: run.trigger.clone(),
            status: run.status,
            started_at: run.started_at,
            ended_at: run.ended_at,
            duration_ms: run
                .ended_at
                .map(|end| (end - run.started_at).num_milliseconds()),
            stages: run
                .stages
                .iter()
                .map(|s| StageSummary {
                    name: s.name,
                    status: s.status,
                    duration_ms: s.ended_at.map(|end| (end - s.started_at).num_milliseconds()),
                    error: s.error.clone(),
                })
                .collect(),
            failed_stage: run.failed_stage().map(|s| s.name),
            backup_id: run.backup_id,
            rollback: run.rollback.as_ref().map(|r| RollbackSummary {
                backup_id: r.backup_id,
                succeeded: r.succeeded,
                error: r.error.clone(),
                unhealthy_checks: r
                    .health
                    .iter()
                    .filter(|c| !c.healthy)
                    .map(|c| c.check_name.clone())
                    .collect(),
            }),
            requires_attention: run.requires_attention(),
        }
    }
}

impl From<PipelineRun> for RunSummary {
    fn from(run: PipelineRun) -> Self {
        Self::from(&run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stage::StageResult;

    #[test]
    fn test_summary_reports_failed_stage() {
        let mut run = PipelineRun::new(Trigger::Schedule, "staging");
        let mut test = StageResult::running(StageName::Test);
        test.status = StageStatus::Failed;
        test.error = Some("unit: exit code 1".to_string());
        run.upsert_stage(test);
        run.finish(RunStatus::Failed).unwrap();

        let summary = RunSummary::from(&run);
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.failed_stage, Some(StageName::Test));
        assert_eq!(summary.stages[0].error.as_deref(), Some("unit: exit code 1"));
        assert!(summary.duration_ms.is_some());
        assert!(!summary.requires_attention);
    }
}
