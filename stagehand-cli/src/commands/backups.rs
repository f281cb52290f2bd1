//! Backup command handlers
//!
//! Lists and prunes the snapshots taken before each deployment.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use stagehand_core::dto::backup::BackupSummary;
use stagehand_orchestrator::Orchestrator;

use crate::output;

/// Backup subcommands
#[derive(Subcommand)]
pub enum BackupCommands {
    /// List backups, newest first
    List {
        #[arg(short, long)]
        environment: Option<String>,
    },
    /// Delete all but the most recent backups of an environment
    Prune {
        #[arg(short, long)]
        environment: String,

        /// Backups to keep (default: backup_retention)
        #[arg(short, long)]
        keep: Option<usize>,
    },
}

/// Handle backup commands
///
/// # Arguments
/// * `command` - The backup command to execute
/// * `orchestrator` - Orchestrator built from the loaded settings
pub async fn handle_backup_command(command: BackupCommands, orchestrator: &Orchestrator) -> Result<u8> {
    match command {
        BackupCommands::List { environment } => list_backups(environment.as_deref(), orchestrator),
        BackupCommands::Prune { environment, keep } => {
            let keep = keep.unwrap_or(orchestrator.settings().backup_retention);
            prune_backups(&environment, keep, orchestrator).await
        }
    }
}

fn list_backups(environment: Option<&str>, orchestrator: &Orchestrator) -> Result<u8> {
    let backups = match orchestrator.backups(environment) {
        Ok(backups) => backups,
        Err(e) if e.is_rejection() => return output::report_rejection(&e),
        Err(e) => return Err(e).context("failed to read backup catalog"),
    };

    let summaries: Vec<BackupSummary> = backups.iter().map(BackupSummary::from).collect();
    output::print_json(&summaries)?;

    if summaries.is_empty() {
        eprintln!("{}", "No backups.".yellow());
    } else {
        eprintln!("{}", format!("Found {} backup(s):", summaries.len()).bold());
        for backup in &backups {
            eprintln!(
                "  {} {} {} {}",
                "▸".cyan(),
                backup.id.to_string().bold(),
                backup.environment,
                backup
                    .created_at
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
                    .dimmed()
            );
        }
    }
    Ok(output::EXIT_OK)
}

async fn prune_backups(environment: &str, keep: usize, orchestrator: &Orchestrator) -> Result<u8> {
    let removed = match orchestrator.prune_backups(environment, keep).await {
        Ok(removed) => removed,
        Err(e) if e.is_rejection() => return output::report_rejection(&e),
        Err(e) => return Err(e).with_context(|| format!("failed to prune backups of {}", environment)),
    };

    let summaries: Vec<BackupSummary> = removed.iter().map(BackupSummary::from).collect();
    output::print_json(&summaries)?;
    eprintln!(
        "{}",
        format!("Removed {} backup(s) of {}, kept {}", removed.len(), environment, keep).green()
    );
    Ok(output::EXIT_OK)
}
