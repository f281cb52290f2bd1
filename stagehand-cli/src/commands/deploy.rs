//! Deploy and rollback command handlers

use anyhow::{Context, Result};
use stagehand_core::config::Settings;
use stagehand_core::domain::pipeline::Trigger;
use stagehand_orchestrator::Orchestrator;

use crate::output;

/// What `deploy` was asked to run
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub environment: Option<String>,
    pub branch: Option<String>,
    pub pr: Option<u64>,
    pub schedule: bool,
}

impl Target {
    /// Resolves the trigger and environment
    ///
    /// Without an explicit environment, `--branch` picks the environment the
    /// branch maps to, otherwise the default environment is used. A push with
    /// no `--branch` uses the branch mapped to the environment, or `main`.
    pub fn resolve(&self, settings: &Settings) -> Result<(Trigger, String), String> {
        let environment = match (&self.environment, &self.branch) {
            (Some(environment), _) => environment.clone(),
            (None, Some(branch)) => settings
                .environment_for_branch(branch)
                .map(str::to_string)
                .ok_or_else(|| format!("branch '{}' is not mapped to an environment", branch))?,
            (None, None) => settings.default_environment.clone(),
        };

        let trigger = if let Some(number) = self.pr {
            Trigger::PullRequest {
                number,
                branch: self.branch.clone(),
            }
        } else if self.schedule {
            Trigger::Schedule
        } else {
            let name = self
                .branch
                .clone()
                .or_else(|| settings.branch_for_environment(&environment).map(str::to_string))
                .unwrap_or_else(|| "main".to_string());
            Trigger::Branch { name }
        };

        Ok((trigger, environment))
    }
}

pub async fn handle_deploy(target: Target, orchestrator: &Orchestrator) -> Result<u8> {
    let (trigger, environment) = match target.resolve(orchestrator.settings()) {
        Ok(resolved) => resolved,
        Err(message) => return output::reject("invalid_request", &message),
    };

    tracing::info!("Deploying to {} ({})", environment, trigger);

    match orchestrator.run(trigger, &environment).await {
        Ok(run) => output::report_run(&run),
        Err(e) if e.is_rejection() => output::report_rejection(&e),
        Err(e) => Err(e).with_context(|| format!("pipeline run on {} failed", environment)),
    }
}

pub async fn handle_rollback(environment: Option<String>, orchestrator: &Orchestrator) -> Result<u8> {
    let environment =
        environment.unwrap_or_else(|| orchestrator.settings().default_environment.clone());

    match orchestrator.rollback(&environment).await {
        Ok(run) => output::report_run(&run),
        Err(e) if e.is_rejection() => output::report_rejection(&e),
        Err(e) => Err(e).with_context(|| format!("rollback of {} failed", environment)),
    }
}
