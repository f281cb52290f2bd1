//! Status and history command handlers

use anyhow::{Context, Result};
use colored::*;
use stagehand_core::dto::run::RunSummary;
use stagehand_orchestrator::Orchestrator;

use crate::output;

pub fn handle_status(orchestrator: &Orchestrator) -> Result<u8> {
    let report = orchestrator.status().context("failed to read deployment state")?;
    output::print_json(&report)?;

    for env in &report.environments {
        let latest = env
            .latest_run
            .as_ref()
            .map(|r| r.status.to_string())
            .unwrap_or_else(|| "no runs".to_string());
        let active = match &env.active {
            Some(a) if a.owner_alive => format!(", run {} in progress", a.run.id),
            Some(a) => format!(", run {} interrupted (pid {} gone)", a.run.id, a.owner_pid),
            None => String::new(),
        };
        eprintln!(
            "{} {}: {}, {} backup(s), app {}{}",
            "▸".cyan(),
            env.name.bold(),
            latest,
            env.backups,
            if env.app_running { "running" } else { "stopped" },
            active
        );
    }

    if report.requires_attention {
        eprintln!("{}", "REQUIRES HUMAN ATTENTION".red().bold());
        return Ok(output::EXIT_ATTENTION);
    }
    Ok(output::EXIT_OK)
}

pub fn handle_history(limit: usize, orchestrator: &Orchestrator) -> Result<u8> {
    let runs = orchestrator.history(limit).context("failed to read history")?;
    let summaries: Vec<RunSummary> = runs.iter().map(RunSummary::from).collect();
    output::print_json(&summaries)?;

    if summaries.is_empty() {
        eprintln!("{}", "No finished runs.".yellow());
    } else {
        eprintln!(
            "{}",
            format!("{} finished run(s), newest first", summaries.len()).bold()
        );
    }
    Ok(output::EXIT_OK)
}
