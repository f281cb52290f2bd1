//! Pipeline Orchestrator
//!
//! Drives a [`PipelineRun`] through its stage plan, persisting the run at
//! every stage boundary. Decides whether a failure needs a rollback, performs
//! it, records the terminal run into history and emits notifications.
//!
//! Only one run may hold an environment at a time. The busy marker lives in
//! `state.json` and is checked and set in one locked read-modify-write.
//! A marker is stale once its owner process is gone, or, for markers owned
//! by this process, once no orchestrator here is driving the run.

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Map, Value as JsonValue, json};
use stagehand_core::config::Settings;
use stagehand_core::domain::backup::Backup;
use stagehand_core::domain::notification::NotificationKind;
use stagehand_core::domain::pipeline::{PipelineRun, RollbackRecord, RunStatus, Trigger};
use stagehand_core::domain::stage::{StageName, StageResult, StageStatus};
use stagehand_core::domain::state::ActiveRun;
use stagehand_core::dto::backup::BackupSummary;
use stagehand_core::dto::run::RunSummary;
use stagehand_core::dto::status::{ActiveRunSummary, EnvironmentStatus, StatusReport};
use stagehand_runner::process::pid_is_alive;
use stagehand_runner::{ProcessError, Services, SnapshotError, StageContext, StageRegistry};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::repository::{StateError, StateRepository};
use crate::service::history::HistorySink;
use crate::service::notification::NotificationHub;

/// Why restoring the previous version did not work
#[derive(Debug, Error)]
enum RollbackError {
    #[error("environment '{0}' is not configured")]
    UnknownEnvironment(String),

    #[error("failed to stop running instance: {0}")]
    Stop(#[source] ProcessError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("failed to start restored instance: {0}")]
    Start(#[source] ProcessError),

    #[error("restored instance is unhealthy: {}", .0.join(", "))]
    Unhealthy(Vec<String>),
}

/// Runs driven by any orchestrator in this process
static IN_FLIGHT: Mutex<BTreeSet<Uuid>> = Mutex::new(BTreeSet::new());

/// Marks a run as driven by this process until dropped
struct InFlight(Uuid);

impl InFlight {
    /// `None` if the run is already being driven here
    fn try_enter(run_id: Uuid) -> Option<Self> {
        IN_FLIGHT.lock().insert(run_id).then_some(Self(run_id))
    }

    fn contains(run_id: Uuid) -> bool {
        IN_FLIGHT.lock().contains(&run_id)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        IN_FLIGHT.lock().remove(&self.0);
    }
}

pub struct Orchestrator {
    services: Services,
    stages: StageRegistry,
    state: Arc<StateRepository>,
    history: HistorySink,
    notifier: NotificationHub,
    owner_pid: u32,
}

impl Orchestrator {
    /// Builds an orchestrator with the standard stage runners and the
    /// notification channels enabled in settings
    pub fn new(settings: Settings) -> Self {
        let notifier = NotificationHub::from_settings(&settings.notifications);
        let services = Services::new(Arc::new(settings));
        Self::with_parts(services, StageRegistry::standard(), notifier)
    }

    /// Builds an orchestrator from explicit collaborators
    ///
    /// # Arguments
    /// * `services` - Settings, snapshot store, process controller and prober
    /// * `stages` - Runner for each stage
    /// * `notifier` - Notification channels
    pub fn with_parts(services: Services, stages: StageRegistry, notifier: NotificationHub) -> Self {
        let state = Arc::new(StateRepository::new(
            services.settings.state_dir.join("state.json"),
        ));
        let history = HistorySink::new(state.clone(), services.settings.history_limit);

        Self {
            services,
            stages,
            state,
            history,
            notifier,
            owner_pid: std::process::id(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.services.settings
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn state(&self) -> &StateRepository {
        &self.state
    }

    /// Runs the pipeline for a trigger against one environment
    ///
    /// A `Manual` trigger is an operator rollback and is handled by
    /// [`Orchestrator::rollback`].
    ///
    /// # Arguments
    /// * `trigger` - What started the run; decides the stage plan
    /// * `environment` - Target environment name
    ///
    /// # Returns
    /// The terminal run. Stage and rollback failures are part of the run, not
    /// errors. Errors mean the run was rejected or its state could not be
    /// persisted.
    pub async fn run(&self, trigger: Trigger, environment: &str) -> Result<PipelineRun> {
        if trigger == Trigger::Manual {
            return self.rollback(environment).await;
        }
        self.ensure_environment(environment)?;

        let mut run = PipelineRun::new(trigger, environment);
        let _in_flight = self.acquire(&mut run).await?;

        info!(
            "Pipeline run {} started for {} ({})",
            run.id, run.environment, run.trigger
        );

        let ctx = StageContext::new(
            run.id,
            run.trigger.clone(),
            environment,
            self.services.clone(),
        );

        let failed = match self.run_stages(&mut run, &ctx).await {
            Ok(failed) => failed,
            Err(e) => {
                self.abandon(&run, ctx.mutation_started(), &e).await;
                return Err(e);
            }
        };

        let status = if !failed {
            RunStatus::Success
        } else if self.needs_rollback(&run, ctx.mutation_started()) {
            let record = self.restore_previous(environment).await;
            let status = rollback_status(&record);
            run.rollback = Some(record);
            status
        } else {
            RunStatus::Failed
        };

        self.complete(run, status).await
    }

    /// Operator rollback: restores the latest backup of an environment,
    /// restarts the application and verifies its health
    ///
    /// # Returns
    /// A `Manual` run that ended `RolledBack` or `RollbackFailed`
    pub async fn rollback(&self, environment: &str) -> Result<PipelineRun> {
        self.ensure_environment(environment)?;

        let mut run = PipelineRun::new(Trigger::Manual, environment);
        let _in_flight = self.acquire(&mut run).await?;

        info!("Manual rollback {} started for {}", run.id, environment);

        let record = self.restore_previous(environment).await;
        let status = rollback_status(&record);
        run.backup_id = record.backup_id;
        run.rollback = Some(record);

        self.complete(run, status).await
    }

    /// Finishes runs left active by a process that no longer exists, or by
    /// this process when nothing here is driving them anymore
    ///
    /// Unfinished stages are marked failed. The run then goes through the
    /// same rollback decision as a live failure: it rolls back when the
    /// deploy stage had started and a backup of the run exists. Interrupted
    /// manual rollbacks are retried.
    ///
    /// # Returns
    /// The recovered runs in their terminal state
    pub async fn recover_interrupted(&self) -> Result<Vec<PipelineRun>> {
        let stale: Vec<ActiveRun> = self
            .state
            .load()?
            .active
            .into_values()
            .filter(|a| !self.owner_alive(a))
            .collect();

        let mut recovered = Vec::new();
        for active in stale {
            let Some(_in_flight) = InFlight::try_enter(active.run.id) else {
                continue;
            };
            let Some(mut run) = self.claim(&active)? else {
                continue;
            };

            warn!(
                "Recovering run {} on {}: owner process {} exited",
                run.id, run.environment, active.owner_pid
            );

            let reason = format!("interrupted: owner process {} exited", active.owner_pid);
            for stage in &mut run.stages {
                stage.interrupt(reason.clone());
            }

            let own_backup = self.backup_of(&run).await;
            if let Some(backup) = &own_backup {
                run.backup_id = Some(backup.id);
            }

            let rollback = match run.trigger {
                Trigger::Manual => true,
                _ => self.needs_rollback(&run, own_backup.is_some()),
            };

            let status = if rollback {
                let record = self.restore_previous(&run.environment).await;
                let status = rollback_status(&record);
                if run.trigger == Trigger::Manual {
                    run.backup_id = record.backup_id;
                }
                run.rollback = Some(record);
                status
            } else {
                RunStatus::Failed
            };

            recovered.push(self.complete(run, status).await?);
        }

        Ok(recovered)
    }

    /// Snapshot of every configured environment
    pub fn status(&self) -> Result<StatusReport> {
        let state = self.state.load()?;
        let mut environments = Vec::new();

        for name in self.settings().environments.keys() {
            let active = state.active_run(name).map(|a| ActiveRunSummary {
                owner_pid: a.owner_pid,
                owner_alive: self.owner_alive(a),
                run: RunSummary::from(&a.run),
            });
            let backups = self.services.snapshots.list(Some(name.as_str()))?;

            environments.push(EnvironmentStatus {
                name: name.clone(),
                active,
                latest_run: state.latest_for(name).map(RunSummary::from),
                app_running: self.services.process.is_running(name),
                backups: backups.len(),
                latest_backup: backups.first().map(BackupSummary::from),
            });
        }

        Ok(StatusReport::new(environments))
    }

    /// Finished runs, newest first
    pub fn history(&self, limit: usize) -> Result<Vec<PipelineRun>> {
        Ok(self.history.recent(limit)?)
    }

    /// Backups, newest first, optionally for one environment
    pub fn backups(&self, environment: Option<&str>) -> Result<Vec<Backup>> {
        if let Some(environment) = environment {
            self.ensure_environment(environment)?;
        }
        Ok(self.services.snapshots.list(environment)?)
    }

    /// Deletes all but the `keep` most recent backups of an environment
    ///
    /// Refused while a run holds the environment, since that run may need
    /// its backup for a rollback.
    pub async fn prune_backups(&self, environment: &str, keep: usize) -> Result<Vec<Backup>> {
        self.ensure_environment(environment)?;

        if let Some(active) = self.state.load()?.active_run(environment) {
            return Err(OrchestratorError::ConcurrentRun {
                environment: environment.to_string(),
                run_id: active.run.id,
            });
        }

        let removed = self.services.snapshots.spawn_prune(environment, keep).await?;
        info!("Pruned {} backup(s) of {}", removed.len(), environment);
        Ok(removed)
    }

    /// Whether the process holding a busy marker is still driving its run
    fn owner_alive(&self, active: &ActiveRun) -> bool {
        if active.owner_pid == self.owner_pid {
            InFlight::contains(active.run.id)
        } else {
            pid_is_alive(active.owner_pid)
        }
    }

    fn ensure_environment(&self, environment: &str) -> Result<()> {
        if self.settings().environment(environment).is_none() {
            return Err(OrchestratorError::UnknownEnvironment(environment.to_string()));
        }
        Ok(())
    }

    /// Marks the run as running and takes the environment's busy marker
    ///
    /// A busy environment rejects the run and emits a failure notification;
    /// the run already holding it is left untouched.
    async fn acquire(&self, run: &mut PipelineRun) -> Result<InFlight> {
        run.status = RunStatus::Running;
        let owner_pid = self.owner_pid;
        let in_flight = InFlight::try_enter(run.id).ok_or_else(|| {
            OrchestratorError::ConcurrentRun {
                environment: run.environment.clone(),
                run_id: run.id,
            }
        })?;

        let claimed = self.state.update(|state| {
            if let Some(active) = state.active_run(&run.environment) {
                return Err(OrchestratorError::ConcurrentRun {
                    environment: run.environment.clone(),
                    run_id: active.run.id,
                });
            }
            state.active.insert(
                run.environment.clone(),
                ActiveRun {
                    owner_pid,
                    run: run.clone(),
                },
            );
            Ok(())
        });

        if let Err(OrchestratorError::ConcurrentRun { environment, run_id }) = &claimed {
            warn!(
                "Rejected run {} on {}: run {} is in progress",
                run.id, environment, run_id
            );
            self.notifier
                .notify(
                    NotificationKind::Failure,
                    json!({
                        "run_id": run.id,
                        "environment": environment,
                        "status": "Rejected",
                        "trigger": run.trigger.to_string(),
                        "reason": "concurrent_run",
                        "active_run_id": run_id,
                    }),
                )
                .await;
        }

        claimed.map(|()| in_flight)
    }

    /// Moves a dead owner's busy marker to this process
    ///
    /// Returns `None` if the marker changed hands since it was read.
    fn claim(&self, stale: &ActiveRun) -> Result<Option<PipelineRun>> {
        let owner_pid = self.owner_pid;
        let claimed = self.state.update(|state| {
            let Some(active) = state
                .active
                .get_mut(&stale.run.environment)
                .filter(|a| a.run.id == stale.run.id && a.owner_pid == stale.owner_pid)
            else {
                return Ok::<_, StateError>(None);
            };
            active.owner_pid = owner_pid;
            Ok(Some(active.run.clone()))
        })?;
        Ok(claimed)
    }

    /// Runs the stage plan, persisting the run around every stage
    ///
    /// # Returns
    /// Whether a stage failed
    async fn run_stages(&self, run: &mut PipelineRun, ctx: &StageContext) -> Result<bool> {
        for &stage in run.trigger.stage_plan() {
            run.upsert_stage(StageResult::running(stage));
            self.persist(run)?;

            let result = self.run_stage(stage, ctx).await;
            let failed = result.is_failed();
            run.upsert_stage(result);
            if let Some(backup) = ctx.backup() {
                run.backup_id = Some(backup.id);
            }
            self.persist(run)?;

            if failed {
                warn!("Run {} stopped at failed stage {}", run.id, stage);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Cleans up after a run whose state could not be persisted
    ///
    /// Restores the previous release if live files may have changed, then
    /// tries to clear the busy marker. A marker that cannot be cleared is
    /// picked up by [`Orchestrator::recover_interrupted`].
    async fn abandon(&self, run: &PipelineRun, mutation_started: bool, cause: &OrchestratorError) {
        error!(
            "Run {} on {} abandoned: {}",
            run.id, run.environment, cause
        );

        if self.needs_rollback(run, mutation_started) {
            let record = self.restore_previous(&run.environment).await;
            if !record.succeeded {
                error!(
                    "Run {} left {} unrestored, requires human attention",
                    run.id, run.environment
                );
            }
        }

        match self.history.release(run) {
            Ok(_) => debug!("Released {} after abandoning run {}", run.environment, run.id),
            Err(e) => warn!(
                "Could not release {} after abandoning run {}: {}",
                run.environment, run.id, e
            ),
        }
    }

    /// Writes the in-flight run into its busy marker
    fn persist(&self, run: &PipelineRun) -> Result<()> {
        self.state.update(|state| {
            if let Some(active) = state
                .active
                .get_mut(&run.environment)
                .filter(|a| a.run.id == run.id)
            {
                active.run = run.clone();
            }
            Ok::<_, StateError>(())
        })?;
        Ok(())
    }

    async fn run_stage(&self, stage: StageName, ctx: &StageContext) -> StageResult {
        match self.stages.get(stage) {
            Some(runner) => {
                debug!("Run {}: starting stage {}", ctx.run_id, stage);
                runner.run(ctx).await
            }
            None => {
                let error = format!("no runner registered for stage {}", stage);
                warn!("Run {}: {}", ctx.run_id, error);
                StageResult {
                    name: stage,
                    status: StageStatus::Failed,
                    started_at: Utc::now(),
                    ended_at: Some(Utc::now()),
                    log_lines: vec![format!("ERROR: {}", error)],
                    error: Some(error),
                }
            }
        }
    }

    /// Rollback is needed once the deploy stage may have changed the live
    /// environment
    fn needs_rollback(&self, run: &PipelineRun, mutation_started: bool) -> bool {
        if !run.deploy_reached() {
            return false;
        }
        if !mutation_started {
            info!(
                "Run {} failed before touching {}, nothing to roll back",
                run.id, run.environment
            );
            return false;
        }
        if !self.settings().rollback_enabled {
            warn!("Run {} needs a rollback but rollback is disabled", run.id);
            return false;
        }
        true
    }

    /// Stops the application, restores the latest backup, starts it again
    /// and checks its health
    async fn restore_previous(&self, environment: &str) -> RollbackRecord {
        let mut record = RollbackRecord {
            backup_id: None,
            started_at: Utc::now(),
            ended_at: None,
            succeeded: false,
            error: None,
            health: Vec::new(),
        };

        warn!("Rolling back {}", environment);

        match self.try_restore(environment, &mut record).await {
            Ok(()) => {
                record.succeeded = true;
                info!("Rollback of {} succeeded", environment);
            }
            Err(e) => {
                error!("Rollback of {} failed: {}", environment, e);
                record.error = Some(e.to_string());
            }
        }

        record.ended_at = Some(Utc::now());
        record
    }

    async fn try_restore(
        &self,
        environment: &str,
        record: &mut RollbackRecord,
    ) -> std::result::Result<(), RollbackError> {
        let env = self
            .settings()
            .environment(environment)
            .ok_or_else(|| RollbackError::UnknownEnvironment(environment.to_string()))?;

        self.services
            .process
            .stop(environment)
            .await
            .map_err(RollbackError::Stop)?;

        let backup = self
            .services
            .snapshots
            .spawn_restore_latest(environment)
            .await?;
        record.backup_id = Some(backup.id);

        self.services
            .process
            .start(environment, &env.live_dir, &env.env_vars)
            .await
            .map_err(RollbackError::Start)?;

        let report = self.services.prober.check(environment, env).await;
        let healthy = report.is_healthy();
        let failing: Vec<String> = report.failures().map(|c| c.check_name.clone()).collect();
        record.health = report.checks;

        if !healthy {
            return Err(RollbackError::Unhealthy(failing));
        }
        Ok(())
    }

    /// Backup taken by the run's own deploy stage, if any
    async fn backup_of(&self, run: &PipelineRun) -> Option<Backup> {
        match self.services.snapshots.list(Some(&run.environment)) {
            Ok(backups) => backups.into_iter().find(|b| b.pipeline_run_id == run.id),
            Err(e) => {
                warn!("Could not read backup catalog for {}: {}", run.environment, e);
                None
            }
        }
    }

    /// Finishes the run: history, retention, notification, scratch cleanup
    async fn complete(&self, mut run: PipelineRun, status: RunStatus) -> Result<PipelineRun> {
        run.finish(status)?;
        self.history.record(&run)?;

        info!(
            "Pipeline run {} on {} finished: {}",
            run.id, run.environment, run.status
        );

        if run.status == RunStatus::Success {
            let keep = self.settings().backup_retention;
            match self.services.snapshots.spawn_prune(&run.environment, keep).await {
                Ok(removed) if !removed.is_empty() => {
                    debug!("Pruned {} old backup(s) of {}", removed.len(), run.environment)
                }
                Ok(_) => {}
                Err(e) => warn!("Backup retention for {} failed: {}", run.environment, e),
            }
        }

        self.notify_outcome(&run).await;

        let artifact_dir = self.settings().builds_dir().join(run.id.to_string());
        match tokio::fs::remove_dir_all(&artifact_dir).await {
            Ok(()) => debug!("Removed artifact directory {}", artifact_dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Could not remove artifact directory {}: {}",
                artifact_dir.display(),
                e
            ),
        }

        Ok(run)
    }

    async fn notify_outcome(&self, run: &PipelineRun) {
        let kind = match run.status {
            RunStatus::Success => NotificationKind::Success,
            RunStatus::RolledBack => NotificationKind::Rollback,
            RunStatus::RollbackFailed => NotificationKind::CriticalFailure,
            _ => NotificationKind::Failure,
        };
        self.notifier.notify(kind, outcome_payload(run)).await;
    }
}

fn rollback_status(record: &RollbackRecord) -> RunStatus {
    if record.succeeded {
        RunStatus::RolledBack
    } else {
        RunStatus::RollbackFailed
    }
}

/// Notification data for a finished run; optional fields only when present
fn outcome_payload(run: &PipelineRun) -> JsonValue {
    let mut data = Map::new();
    data.insert("run_id".into(), json!(run.id));
    data.insert("environment".into(), json!(run.environment));
    data.insert("status".into(), json!(run.status.to_string()));
    data.insert("trigger".into(), json!(run.trigger.to_string()));

    if let Some(stage) = run.failed_stage() {
        data.insert("failed_stage".into(), json!(stage.name));
        if let Some(error) = &stage.error {
            data.insert("error".into(), json!(error));
        }
    }
    if let Some(backup_id) = run.backup_id {
        data.insert("backup_id".into(), json!(backup_id));
    }
    if let Some(error) = run.rollback.as_ref().and_then(|r| r.error.as_ref()) {
        data.insert("rollback_error".into(), json!(error));
    }
    if run.requires_attention() {
        data.insert("reason".into(), json!("requires_human_attention"));
    }

    JsonValue::Object(data)
}
