//! Verify stage: gates the deployment on the health prober

use async_trait::async_trait;
use stagehand_core::domain::stage::{StageName, StageResult};

use super::StageRunner;
use crate::context::{StageContext, StageRecorder};

pub struct VerifyStage;

#[async_trait]
impl StageRunner for VerifyStage {
    fn stage(&self) -> StageName {
        StageName::Verify
    }

    async fn run(&self, ctx: &StageContext) -> StageResult {
        let recorder = StageRecorder::new(StageName::Verify);

        let env = match ctx.env_settings() {
            Ok(env) => env,
            Err(e) => return recorder.finish(Err(e)),
        };

        let report = ctx.services.prober.check(&ctx.environment, env).await;
        for line in report.summary_lines() {
            recorder.info(line);
        }

        if report.is_healthy() {
            return recorder.finish(Ok(()));
        }

        let failed: Vec<&str> = report.failures().map(|c| c.check_name.as_str()).collect();
        recorder.finish(Err(anyhow::anyhow!(
            "health checks failed: {}",
            failed.join(", ")
        )))
    }
}
