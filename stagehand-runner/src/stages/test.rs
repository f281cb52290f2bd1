//! Test stage: runs the configured test and lint commands in the source directory

use async_trait::async_trait;
use stagehand_core::domain::stage::{StageName, StageResult};
use std::collections::BTreeMap;
use std::time::Duration;

use super::StageRunner;
use crate::command::execute_commands;
use crate::context::{StageContext, StageRecorder};

pub struct TestStage;

#[async_trait]
impl StageRunner for TestStage {
    fn stage(&self) -> StageName {
        StageName::Test
    }

    async fn run(&self, ctx: &StageContext) -> StageResult {
        let recorder = StageRecorder::new(StageName::Test);
        let settings = &ctx.settings().stages.test;

        if settings.commands.is_empty() {
            recorder.warn("no test commands configured");
            return recorder.finish(Ok(()));
        }

        let outcome = execute_commands(
            &recorder,
            &settings.commands,
            &ctx.settings().source_dir,
            &BTreeMap::new(),
            Duration::from_secs(settings.timeout_secs),
        )
        .await;

        recorder.finish(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Services;
    use stagehand_core::config::{CommandSpec, Settings};
    use stagehand_core::domain::pipeline::Trigger;
    use std::sync::Arc;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn context(source: &std::path::Path, commands: Vec<CommandSpec>) -> StageContext {
        let mut settings = Settings {
            source_dir: source.to_path_buf(),
            state_dir: source.join(".state"),
            ..Settings::default()
        };
        settings.stages.test.commands = commands;
        settings.stages.test.timeout_secs = 5;
        StageContext::new(
            Uuid::new_v4(),
            Trigger::Schedule,
            "staging",
            Services::new(Arc::new(settings)),
        )
    }

    #[tokio::test]
    async fn test_passing_commands() {
        let dir = tempdir().unwrap();
        let ctx = context(
            dir.path(),
            vec![
                CommandSpec::new("unit", "sh", &["-c", "echo 12 passing"]),
                CommandSpec::new("lint", "true", &[]),
            ],
        );

        let result = TestStage.run(&ctx).await;
        assert!(!result.is_failed(), "{:?}", result.error);
        assert!(result.log_lines.iter().any(|l| l == "12 passing"));
    }

    #[tokio::test]
    async fn test_failing_command_fails_stage() {
        let dir = tempdir().unwrap();
        let ctx = context(
            dir.path(),
            vec![CommandSpec::new("unit", "sh", &["-c", "echo 1 failing >&2; exit 1"])],
        );

        let result = TestStage.run(&ctx).await;
        assert!(result.is_failed());
        assert_eq!(
            result.error.as_deref(),
            Some("unit failed with exit code 1")
        );
        assert!(result.log_lines.iter().any(|l| l == "1 failing"));
    }

    #[tokio::test]
    async fn test_commands_run_in_source_dir() {
        let dir = tempdir().unwrap();
        let ctx = context(
            dir.path(),
            vec![CommandSpec::new("marker", "touch", &["tests-ran"])],
        );

        TestStage.run(&ctx).await;
        assert!(dir.path().join("tests-ran").exists());
    }
}
