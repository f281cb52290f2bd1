//! Build stage
//!
//! Checks the source tree has every required file, assembles the artifact
//! directory from the deploy paths and runs optional build commands in it.
//! Nothing outside the state directory is touched.

use anyhow::Context as _;
use async_trait::async_trait;
use stagehand_core::domain::stage::{StageName, StageResult};
use std::path::Path;
use std::time::Duration;

use super::{StageRunner, blocking};
use crate::command::execute_commands;
use crate::context::{StageContext, StageRecorder};
use crate::fsutil;

pub struct BuildStage;

#[async_trait]
impl StageRunner for BuildStage {
    fn stage(&self) -> StageName {
        StageName::Build
    }

    async fn run(&self, ctx: &StageContext) -> StageResult {
        let recorder = StageRecorder::new(StageName::Build);
        let outcome = build(ctx, &recorder).await;
        recorder.finish(outcome)
    }
}

async fn build(ctx: &StageContext, recorder: &StageRecorder) -> anyhow::Result<()> {
    let settings = &ctx.settings().stages.build;
    let source = ctx.settings().source_dir.clone();

    let missing: Vec<&String> = settings
        .required_files
        .iter()
        .filter(|f| !source.join(f).is_file())
        .collect();
    if !missing.is_empty() {
        for file in &missing {
            recorder.warn(format!("missing required file {}", file));
        }
        anyhow::bail!(
            "{} required file(s) missing: {}",
            missing.len(),
            missing
                .iter()
                .map(|f| f.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    recorder.info(format!(
        "all {} required file(s) present",
        settings.required_files.len()
    ));

    let artifact = ctx.artifact_dir();
    recorder.info(format!("assembling artifact in {}", artifact.display()));

    let paths = settings.deploy_paths.clone();
    let artifact_dir = artifact.clone();
    let copied = blocking(move || assemble(&source, &artifact_dir, &paths)).await?;
    for (path, present) in copied {
        if present {
            recorder.info(format!("copied {}", path));
        } else {
            recorder.info(format!("{} not present in source, skipped", path));
        }
    }

    if !settings.commands.is_empty() {
        let env_vars = &ctx.env_settings()?.env_vars;
        execute_commands(
            recorder,
            &settings.commands,
            &artifact,
            env_vars,
            Duration::from_secs(settings.timeout_secs),
        )
        .await?;
    }

    Ok(())
}

/// Copies each deploy path into a fresh artifact directory
///
/// Returns every path with whether it existed in the source.
fn assemble(source: &Path, artifact: &Path, paths: &[String]) -> anyhow::Result<Vec<(String, bool)>> {
    fsutil::remove_path(artifact)
        .with_context(|| format!("failed to clear {}", artifact.display()))?;
    std::fs::create_dir_all(artifact)
        .with_context(|| format!("failed to create {}", artifact.display()))?;

    let mut copied = Vec::with_capacity(paths.len());
    for rel in paths {
        let src = source.join(rel);
        if !fsutil::exists(&src) {
            copied.push((rel.clone(), false));
            continue;
        }
        fsutil::copy_path(&src, &artifact.join(rel))
            .with_context(|| format!("failed to copy {} into artifact", rel))?;
        copied.push((rel.clone(), true));
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Services;
    use stagehand_core::config::{CommandSpec, EnvironmentSettings, Settings};
    use stagehand_core::domain::pipeline::Trigger;
    use std::collections::BTreeMap;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn context(root: &Path) -> StageContext {
        let source = root.join("source");
        let mut settings = Settings {
            source_dir: source,
            state_dir: root.join("state"),
            ..Settings::default()
        };
        settings.environments.insert(
            "staging".to_string(),
            EnvironmentSettings {
                live_dir: root.join("live"),
                base_url: "http://127.0.0.1:1".to_string(),
                env_vars: BTreeMap::from([("NODE_ENV".to_string(), "staging".to_string())]),
            },
        );
        StageContext::new(
            Uuid::new_v4(),
            Trigger::Branch {
                name: "develop".to_string(),
            },
            "staging",
            Services::new(Arc::new(settings)),
        )
    }

    fn write_source(root: &Path) {
        let source = root.join("source");
        fs::create_dir_all(source.join("public")).unwrap();
        fs::create_dir_all(source.join("src")).unwrap();
        fs::write(source.join("server.js"), "require('./src/app')").unwrap();
        fs::write(source.join("package.json"), "{}").unwrap();
        fs::write(source.join("public/index.html"), "<html>").unwrap();
        fs::write(source.join("src/app.js"), "module.exports = {}").unwrap();
        fs::write(source.join("README.md"), "not deployed").unwrap();
    }

    #[tokio::test]
    async fn test_artifact_contains_deploy_paths_only() {
        let dir = tempdir().unwrap();
        write_source(dir.path());
        let ctx = context(dir.path());

        let result = BuildStage.run(&ctx).await;
        assert!(!result.is_failed(), "{:?}", result.error);

        let artifact = ctx.artifact_dir();
        assert!(artifact.join("server.js").is_file());
        assert!(artifact.join("src/app.js").is_file());
        assert!(artifact.join("public/index.html").is_file());
        assert!(!artifact.join("README.md").exists());
        assert!(result.log_lines.iter().any(|l| l.contains("node_modules not present")));
    }

    #[tokio::test]
    async fn test_missing_required_file_fails() {
        let dir = tempdir().unwrap();
        write_source(dir.path());
        fs::remove_file(dir.path().join("source/public/index.html")).unwrap();
        let ctx = context(dir.path());

        let result = BuildStage.run(&ctx).await;
        assert!(result.is_failed());
        assert!(result.error.unwrap().contains("public/index.html"));
        assert!(!ctx.artifact_dir().exists());
    }

    #[tokio::test]
    async fn test_build_commands_run_in_artifact() {
        let dir = tempdir().unwrap();
        write_source(dir.path());
        let source = dir.path().join("source");
        let mut settings = Settings {
            source_dir: source,
            state_dir: dir.path().join("state"),
            ..Settings::default()
        };
        settings.stages.build.commands = vec![CommandSpec::new(
            "bundle",
            "sh",
            &["-c", "echo $NODE_ENV > built.txt"],
        )];
        settings.environments.insert(
            "staging".to_string(),
            EnvironmentSettings {
                live_dir: dir.path().join("live"),
                base_url: "http://127.0.0.1:1".to_string(),
                env_vars: BTreeMap::from([("NODE_ENV".to_string(), "staging".to_string())]),
            },
        );
        let ctx = StageContext::new(
            Uuid::new_v4(),
            Trigger::Schedule,
            "staging",
            Services::new(Arc::new(settings)),
        );

        let result = BuildStage.run(&ctx).await;
        assert!(!result.is_failed(), "{:?}", result.error);
        assert_eq!(
            fs::read_to_string(ctx.artifact_dir().join("built.txt")).unwrap().trim(),
            "staging"
        );
        assert!(!dir.path().join("source/built.txt").exists());
    }
}
