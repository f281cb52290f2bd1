//! Deploy stage
//!
//! The only stage that mutates the live environment. Steps, in order:
//! 1. Back up the environment's snapshot paths
//! 2. Install dependencies in the artifact directory
//! 3. Write the environment file into the artifact directory
//! 4. Stop the running instance
//! 5. Replace each deploy path (and the environment file) in the live directory
//! 6. Start the new instance
//!
//! Steps 1-3 leave the live environment untouched; the context is marked as
//! mutated right before step 4.

use anyhow::Context as _;
use async_trait::async_trait;
use stagehand_core::domain::stage::{StageName, StageResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{StageRunner, blocking};
use crate::command::execute_commands;
use crate::context::{StageContext, StageRecorder};
use crate::fsutil;

pub struct DeployStage;

#[async_trait]
impl StageRunner for DeployStage {
    fn stage(&self) -> StageName {
        StageName::Deploy
    }

    async fn run(&self, ctx: &StageContext) -> StageResult {
        let recorder = StageRecorder::new(StageName::Deploy);
        let outcome = deploy(ctx, &recorder).await;
        recorder.finish(outcome)
    }
}

async fn deploy(ctx: &StageContext, recorder: &StageRecorder) -> anyhow::Result<()> {
    let env = ctx.env_settings()?;
    let settings = &ctx.settings().stages.deploy;
    let services = &ctx.services;
    let artifact = ctx.artifact_dir();

    if !artifact.is_dir() {
        anyhow::bail!(
            "artifact directory {} does not exist; the build stage must run first",
            artifact.display()
        );
    }

    let backup = services
        .snapshots
        .spawn_create(ctx.run_id, &ctx.environment)
        .await
        .context("backup failed")?;
    recorder.info(format!(
        "backup {} created ({} path(s), {} absent)",
        backup.id,
        backup.manifest.len(),
        backup.absent.len()
    ));
    ctx.record_backup(backup);

    if let Some(install) = &settings.install {
        execute_commands(
            recorder,
            std::slice::from_ref(install),
            &artifact,
            &env.env_vars,
            Duration::from_secs(settings.timeout_secs),
        )
        .await
        .context("dependency installation failed")?;
    }

    let env_file = artifact.join(&settings.env_file);
    tokio::fs::write(&env_file, render_env_file(&env.env_vars))
        .await
        .with_context(|| format!("failed to write {}", env_file.display()))?;
    recorder.info(format!(
        "wrote {} with {} variable(s)",
        settings.env_file,
        env.env_vars.len()
    ));

    ctx.mark_mutation_started();

    if services
        .process
        .stop(&ctx.environment)
        .await
        .context("failed to stop running instance")?
    {
        recorder.info("stopped running instance");
    } else {
        recorder.info("no running instance to stop");
    }

    let mut paths = ctx.settings().stages.build.deploy_paths.clone();
    if !paths.contains(&settings.env_file) {
        paths.push(settings.env_file.clone());
    }
    let live_dir = env.live_dir.clone();
    let source = artifact.clone();
    let replaced = blocking(move || install_paths(&source, &live_dir, &paths)).await?;
    recorder.info(format!(
        "replaced {} path(s) in {}",
        replaced.len(),
        env.live_dir.display()
    ));

    let handle = services
        .process
        .start(&ctx.environment, &env.live_dir, &env.env_vars)
        .await
        .context("failed to start new instance")?;
    recorder.info(format!(
        "started instance pid {} (log: {})",
        handle.pid,
        handle.log_file.display()
    ));

    Ok(())
}

/// Makes each live path an exact copy of the artifact's, deleting paths the artifact lacks
fn install_paths(artifact: &Path, live_dir: &Path, paths: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(live_dir)
        .with_context(|| format!("failed to create {}", live_dir.display()))?;

    let mut replaced = Vec::with_capacity(paths.len());
    for rel in paths {
        let dst = live_dir.join(rel);
        fsutil::replace_path(&artifact.join(rel), &dst)
            .with_context(|| format!("failed to install {}", rel))?;
        replaced.push(dst);
    }
    Ok(replaced)
}

/// Renders `KEY=value` lines, quoting values that need it
fn render_env_file(vars: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (key, value) in vars {
        let plain = !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "-_./:@,+".contains(c));
        if plain {
            out.push_str(&format!("{}={}\n", key, value));
        } else {
            let escaped = value
                .replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('\n', "\\n");
            out.push_str(&format!("{}=\"{}\"\n", key, escaped));
        }
    }
    out
}
