//! Output helpers
//!
//! Every command prints a JSON document on stdout and a colored one-line
//! summary on stderr, and maps its outcome to an exit code.

use anyhow::Result;
use colored::*;
use serde::Serialize;
use serde_json::json;
use stagehand_core::domain::pipeline::{PipelineRun, RunStatus};
use stagehand_core::dto::run::RunSummary;
use stagehand_orchestrator::OrchestratorError;

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILED: u8 = 1;
pub const EXIT_REJECTED: u8 = 2;
pub const EXIT_ATTENTION: u8 = 3;

/// Pretty-prints a value as JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn exit_code(status: RunStatus) -> u8 {
    match status {
        RunStatus::Success => EXIT_OK,
        RunStatus::RollbackFailed => EXIT_ATTENTION,
        _ => EXIT_FAILED,
    }
}

/// Prints a finished run and returns its exit code
pub fn report_run(run: &PipelineRun) -> Result<u8> {
    print_json(&RunSummary::from(run))?;
    eprintln!("{}", summary_line(run));
    Ok(exit_code(run.status))
}

fn summary_line(run: &PipelineRun) -> String {
    let head = format!("{} {} ({})", run.environment, run.status, run.trigger);
    match run.status {
        RunStatus::Success => format!("{} {}", "✔".green(), head.green().bold()),
        RunStatus::RolledBack => {
            let stage = failed_stage_name(run);
            format!(
                "{} {} after {} failed, previous release restored",
                "↺".yellow(),
                head.yellow().bold(),
                stage
            )
        }
        RunStatus::RollbackFailed => format!(
            "{} {} REQUIRES HUMAN ATTENTION: {}",
            "✖".red(),
            head.red().bold(),
            run.rollback
                .as_ref()
                .and_then(|r| r.error.as_deref())
                .unwrap_or("rollback failed")
        ),
        _ => format!(
            "{} {} at {}: {}",
            "✖".red(),
            head.red().bold(),
            failed_stage_name(run),
            run.failed_stage()
                .and_then(|s| s.error.as_deref())
                .unwrap_or("unknown error")
        ),
    }
}

fn failed_stage_name(run: &PipelineRun) -> String {
    run.failed_stage()
        .map(|s| s.name.to_string())
        .unwrap_or_else(|| "unknown stage".to_string())
}

/// Prints a refused request and returns the rejection exit code
pub fn report_rejection(err: &OrchestratorError) -> Result<u8> {
    let reason = match err {
        OrchestratorError::ConcurrentRun { .. } => "concurrent_run",
        OrchestratorError::UnknownEnvironment(_) => "unknown_environment",
        _ => "error",
    };
    reject(reason, &err.to_string())
}

/// Prints a request that could not be turned into a run
pub fn reject(reason: &str, message: &str) -> Result<u8> {
    print_json(&json!({
        "status": "Rejected",
        "reason": reason,
        "error": message,
    }))?;
    eprintln!("{} {}", "rejected:".yellow().bold(), message);
    Ok(EXIT_REJECTED)
}
