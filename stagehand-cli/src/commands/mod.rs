//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod backups;
mod deploy;
mod status;

pub use backups::BackupCommands;

use anyhow::Result;
use clap::Subcommand;
use stagehand_orchestrator::Orchestrator;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline against an environment
    Deploy {
        /// Target environment; resolved from --branch or the default when omitted
        environment: Option<String>,

        /// Treat the run as a push to this branch
        #[arg(long, conflicts_with_all = ["pr", "schedule"])]
        branch: Option<String>,

        /// Validate a pull request (test, build and security only)
        #[arg(long, conflicts_with = "schedule")]
        pr: Option<u64>,

        /// Scheduled validation run (test, build and security only)
        #[arg(long)]
        schedule: bool,
    },
    /// Restore the latest backup of an environment
    Rollback {
        /// Environment to roll back (default: default_environment)
        #[arg(short, long)]
        environment: Option<String>,
    },
    /// Show active runs, latest results and backups per environment
    ///
    /// Read-only: interrupted runs are reported, not recovered.
    Status,
    /// Show finished runs, newest first
    History {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Backup management
    Backups {
        #[command(subcommand)]
        command: BackupCommands,
    },
}

impl Commands {
    /// Whether the command may change live files, backups or busy markers
    ///
    /// Only these recover interrupted runs before running; the rest only read.
    pub fn mutates(&self) -> bool {
        match self {
            Commands::Deploy { .. } | Commands::Rollback { .. } => true,
            Commands::Backups { command } => matches!(command, BackupCommands::Prune { .. }),
            Commands::Status | Commands::History { .. } => false,
        }
    }
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `orchestrator` - Orchestrator built from the loaded settings
///
/// # Returns
/// The process exit code
pub async fn handle_command(command: Commands, orchestrator: &Orchestrator) -> Result<u8> {
    match command {
        Commands::Deploy {
            environment,
            branch,
            pr,
            schedule,
        } => {
            let target = deploy::Target {
                environment,
                branch,
                pr,
                schedule,
            };
            deploy::handle_deploy(target, orchestrator).await
        }
        Commands::Rollback { environment } => {
            deploy::handle_rollback(environment, orchestrator).await
        }
        Commands::Status => status::handle_status(orchestrator),
        Commands::History { limit } => status::handle_history(limit, orchestrator),
        Commands::Backups { command } => backups::handle_backup_command(command, orchestrator).await,
    }
}
