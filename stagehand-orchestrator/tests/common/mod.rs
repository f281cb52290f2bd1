//! Shared fixture for the orchestrator scenarios
//!
//! Each fixture owns a temporary tree with a source checkout, a live
//! directory and a state directory, plus a fake application on an
//! ephemeral port that the health prober talks to.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{Json, Router, response::Html, routing::get};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use stagehand_core::config::{EnvironmentSettings, Settings};
use stagehand_core::domain::notification::{Notification, NotificationKind};
use stagehand_core::domain::stage::{StageName, StageResult, StageStatus};
use stagehand_orchestrator::service::{NotificationChannel, NotifyError};
use stagehand_orchestrator::{NotificationHub, Orchestrator};
use stagehand_runner::{Services, StageContext, StageRegistry, StageRunner};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

pub const ENV: &str = "production";

pub struct Fixture {
    _dir: TempDir,
    pub root: PathBuf,
    pub settings: Settings,
    pub notes: Recording,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();

        let source = root.join("source");
        write(&source, "server.js", "console.log('v2')");
        write(&source, "package.json", r#"{"name":"app","version":"2.0.0"}"#);
        write(&source, "public/index.html", "<h1>v2</h1>");

        let live = root.join("live");
        write(&live, "server.js", "console.log('v1')");
        write(&live, "package.json", r#"{"name":"app","version":"1.0.0"}"#);
        write(&live, "public/index.html", "<h1>v1</h1>");
        write(&live, "data/poems.json", r#"[{"title":"first"}]"#);

        let base_url = fake_app().await;

        let mut settings = Settings {
            state_dir: root.join("state"),
            source_dir: source,
            ..Settings::default()
        };
        settings.stages.test.commands.clear();
        settings.stages.build.required_files = vec![
            "server.js".to_string(),
            "package.json".to_string(),
            "public/index.html".to_string(),
        ];
        settings.stages.build.deploy_paths = vec![
            "server.js".to_string(),
            "package.json".to_string(),
            "public".to_string(),
        ];
        settings.stages.deploy.install = None;
        settings.process.program = "sleep".to_string();
        settings.process.args = vec!["30".to_string()];
        settings.process.start_grace_ms = 50;
        settings.process.stop_timeout_secs = 2;
        settings.health.api_paths = vec!["/api/poems".to_string()];
        settings.health.asset_paths = vec!["/index.html".to_string()];
        settings.health.retries = 1;
        settings.health.backoff_ms = 10;
        settings.health.max_backoff_ms = 20;
        settings.health.request_timeout_secs = 2;
        settings.notifications.log = false;
        settings.environments.insert(
            ENV.to_string(),
            EnvironmentSettings {
                live_dir: live,
                base_url,
                env_vars: BTreeMap::from([("PORT".to_string(), "3000".to_string())]),
            },
        );

        Self {
            _dir: dir,
            root,
            settings,
            notes: Recording::default(),
        }
    }

    pub fn live(&self) -> PathBuf {
        self.root.join("live")
    }

    pub fn orchestrator(&self, stages: StageRegistry) -> Orchestrator {
        let hub = NotificationHub::new().with_channel(Arc::new(self.notes.clone()));
        self.orchestrator_with(stages, hub)
    }

    pub fn orchestrator_with(&self, stages: StageRegistry, hub: NotificationHub) -> Orchestrator {
        let services = Services::new(Arc::new(self.settings.clone()));
        Orchestrator::with_parts(services, stages, hub)
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Every file under `dir` with its bytes
pub fn tree(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(base: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(base, &path, out);
            } else {
                let rel = path.strip_prefix(base).unwrap().to_path_buf();
                out.insert(rel, fs::read(&path).unwrap());
            }
        }
    }

    let mut out = BTreeMap::new();
    walk(dir, dir, &mut out);
    out
}

/// Serves the endpoints the prober checks
async fn fake_app() -> String {
    let app = Router::new()
        .route("/", get(|| async { Html("<html>poems</html>") }))
        .route("/api/poems", get(|| async { Json(json!([{"title": "first"}])) }))
        .route("/index.html", get(|| async { Html("<html>index</html>") }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Keeps every notification it receives
#[derive(Clone, Default)]
pub struct Recording {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl Recording {
    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.sent.lock().iter().map(|n| n.kind).collect()
    }

    pub fn all(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NotificationChannel for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

/// Always fails to deliver
pub struct Unreachable;

#[async_trait]
impl NotificationChannel for Unreachable {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn send(&self, _notification: &Notification) -> Result<(), NotifyError> {
        Err(NotifyError::Io(std::io::Error::other("connection refused")))
    }
}

pub fn finished(name: StageName, error: Option<&str>) -> StageResult {
    let mut result = StageResult::running(name);
    result.ended_at = Some(Utc::now());
    match error {
        Some(error) => {
            result.status = StageStatus::Failed;
            result.error = Some(error.to_string());
        }
        None => result.status = StageStatus::Success,
    }
    result
}

/// Stage double with a fixed outcome
pub struct Scripted {
    pub stage: StageName,
    pub error: Option<&'static str>,
}

impl Scripted {
    pub fn pass(stage: StageName) -> Arc<Self> {
        Arc::new(Self { stage, error: None })
    }

    pub fn fail(stage: StageName, error: &'static str) -> Arc<Self> {
        Arc::new(Self {
            stage,
            error: Some(error),
        })
    }
}

#[async_trait]
impl StageRunner for Scripted {
    fn stage(&self) -> StageName {
        self.stage
    }

    async fn run(&self, _ctx: &StageContext) -> StageResult {
        finished(self.stage, self.error)
    }
}

/// Deploy double that overwrites a live file without taking a backup, then fails
pub struct ClobberingDeploy;

#[async_trait]
impl StageRunner for ClobberingDeploy {
    fn stage(&self) -> StageName {
        StageName::Deploy
    }

    async fn run(&self, ctx: &StageContext) -> StageResult {
        ctx.mark_mutation_started();
        let live = &ctx.env_settings().unwrap().live_dir;
        fs::write(live.join("server.js"), "half-written").unwrap();
        finished(StageName::Deploy, Some("failed to start new instance"))
    }
}

/// Deploy double that backs up, rewrites a live file, then swaps `state.json`
/// for a directory so the run can no longer be persisted
///
/// The real state file is parked at `state.json.parked`; see [`restore_state`].
pub struct StateBreakingDeploy;

#[async_trait]
impl StageRunner for StateBreakingDeploy {
    fn stage(&self) -> StageName {
        StageName::Deploy
    }

    async fn run(&self, ctx: &StageContext) -> StageResult {
        let backup = ctx
            .services
            .snapshots
            .spawn_create(ctx.run_id, &ctx.environment)
            .await
            .unwrap();
        ctx.record_backup(backup);

        ctx.mark_mutation_started();
        let live = &ctx.env_settings().unwrap().live_dir;
        fs::write(live.join("server.js"), "half-written").unwrap();

        let state_file = ctx.settings().state_dir.join("state.json");
        fs::rename(&state_file, state_file.with_extension("json.parked")).unwrap();
        fs::create_dir_all(state_file.join("blocked")).unwrap();

        finished(StageName::Deploy, None)
    }
}

/// Undoes [`StateBreakingDeploy`]
pub fn restore_state(settings: &Settings) {
    let state_file = settings.state_dir.join("state.json");
    fs::remove_dir_all(&state_file).unwrap();
    fs::rename(state_file.with_extension("json.parked"), &state_file).unwrap();
}

/// Deploy double that fails before touching the live directory
pub struct EarlyDeployFailure;

#[async_trait]
impl StageRunner for EarlyDeployFailure {
    fn stage(&self) -> StageName {
        StageName::Deploy
    }

    async fn run(&self, _ctx: &StageContext) -> StageResult {
        finished(StageName::Deploy, Some("backup failed: disk full"))
    }
}

/// Validation-only registry where every stage passes
pub fn passing_validation() -> StageRegistry {
    StageRegistry::empty()
        .with(Scripted::pass(StageName::Test))
        .with(Scripted::pass(StageName::Build))
        .with(Scripted::pass(StageName::Security))
}
