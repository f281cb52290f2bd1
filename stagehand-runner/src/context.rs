//! Stage execution context
//!
//! Everything a stage runner needs during a pipeline run:
//! - Run identity (run id, trigger, environment)
//! - Settings and the environment's live directory
//! - The snapshot store, process controller and health prober
//! - The backup taken by the deploy stage and whether live files were touched
//!
//! Stage log lines are collected by a [`StageRecorder`] and end up in the
//! run record.

use chrono::Utc;
use parking_lot::Mutex;
use stagehand_core::config::{EnvironmentSettings, Settings};
use stagehand_core::domain::backup::Backup;
use stagehand_core::domain::pipeline::Trigger;
use stagehand_core::domain::stage::{StageName, StageResult, StageStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::health::HealthProber;
use crate::process::ProcessController;
use crate::snapshot::SnapshotStore;

/// Long-lived collaborators shared by every run
#[derive(Clone)]
pub struct Services {
    pub settings: Arc<Settings>,
    pub snapshots: Arc<SnapshotStore>,
    pub process: Arc<ProcessController>,
    pub prober: Arc<HealthProber>,
}

impl Services {
    /// Builds the standard services from settings
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            snapshots: Arc::new(SnapshotStore::new(&settings)),
            process: Arc::new(ProcessController::new(&settings)),
            prober: Arc::new(HealthProber::new(settings.health.clone())),
            settings,
        }
    }
}

/// Per-run context handed to every stage
pub struct StageContext {
    pub run_id: Uuid,
    pub trigger: Trigger,
    pub environment: String,
    pub services: Services,

    /// Backup taken by the deploy stage
    backup: Mutex<Option<Backup>>,

    /// Set once the deploy stage is about to touch the live environment
    mutation_started: AtomicBool,
}

impl StageContext {
    /// Creates a context for one run
    ///
    /// # Arguments
    /// * `run_id` - The pipeline run ID
    /// * `trigger` - What started the run
    /// * `environment` - Target environment, must be configured
    /// * `services` - Shared collaborators
    pub fn new(run_id: Uuid, trigger: Trigger, environment: &str, services: Services) -> Self {
        Self {
            run_id,
            trigger,
            environment: environment.to_string(),
            services,
            backup: Mutex::new(None),
            mutation_started: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.services.settings
    }

    /// Settings of the target environment
    pub fn env_settings(&self) -> anyhow::Result<&EnvironmentSettings> {
        self.settings()
            .environment(&self.environment)
            .ok_or_else(|| anyhow::anyhow!("environment '{}' is not configured", self.environment))
    }

    /// Scratch directory the build stage fills and the deploy stage installs from
    pub fn artifact_dir(&self) -> PathBuf {
        self.settings().builds_dir().join(self.run_id.to_string())
    }

    pub fn record_backup(&self, backup: Backup) {
        *self.backup.lock() = Some(backup);
    }

    pub fn backup(&self) -> Option<Backup> {
        self.backup.lock().clone()
    }

    pub fn mark_mutation_started(&self) {
        self.mutation_started.store(true, Ordering::SeqCst);
    }

    /// Whether live files or the running process may have changed
    pub fn mutation_started(&self) -> bool {
        self.mutation_started.load(Ordering::SeqCst)
    }
}

/// Collects the log lines of one stage and turns its outcome into a [`StageResult`]
pub struct StageRecorder {
    result: Mutex<StageResult>,
}

impl StageRecorder {
    pub fn new(name: StageName) -> Self {
        Self {
            result: Mutex::new(StageResult::running(name)),
        }
    }

    pub fn name(&self) -> StageName {
        self.result.lock().name
    }

    /// Logs an info line
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        let mut result = self.result.lock();
        info!("[{}] {}", result.name, message);
        result.log_lines.push(message);
    }

    /// Logs a warning line
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        let mut result = self.result.lock();
        warn!("[{}] {}", result.name, message);
        result.log_lines.push(format!("WARN: {}", message));
    }

    /// Records captured command output, one log line per non-empty line
    pub fn output(&self, text: &str) {
        let mut result = self.result.lock();
        for line in text.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
            debug!("[{}] {}", result.name, line);
            result.log_lines.push(line.to_string());
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.result.lock().log_lines.clone()
    }

    /// Finalizes the stage
    ///
    /// An error becomes a failed result carrying the full error chain.
    pub fn finish(&self, outcome: anyhow::Result<()>) -> StageResult {
        let mut result = self.result.lock().clone();
        result.ended_at = Some(Utc::now());

        match outcome {
            Ok(()) => {
                result.status = StageStatus::Success;
                info!("[{}] stage succeeded", result.name);
            }
            Err(e) => {
                let error = format!("{:#}", e);
                warn!("[{}] stage failed: {}", result.name, error);
                result.status = StageStatus::Failed;
                result.log_lines.push(format!("ERROR: {}", error));
                result.error = Some(error);
            }
        }

        result
    }
}
