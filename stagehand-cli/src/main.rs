//! Stagehand CLI
//!
//! Command-line interface for running release pipelines.

mod commands;
mod config;
mod output;

use clap::Parser;
use colored::*;
use commands::{Commands, handle_command};
use config::Config;
use stagehand_orchestrator::Orchestrator;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "Stagehand release pipeline", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, env = "STAGEHAND_CONFIG", default_value = "stagehand.toml")]
    config: PathBuf,

    /// Override the state directory from the settings file
    #[arg(long, env = "STAGEHAND_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the JSON summaries
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "stagehand=info,stagehand_orchestrator=info,stagehand_runner=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = Config {
        config_path: cli.config,
        state_dir: cli.state_dir,
    };

    let settings = match config.load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {}", "invalid configuration:".red().bold(), e);
            return ExitCode::from(output::EXIT_REJECTED);
        }
    };

    let orchestrator = Orchestrator::new(settings);

    if cli.command.mutates() {
        recover(&orchestrator).await;
    }

    match handle_command(cli.command, &orchestrator).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(output::EXIT_FAILED)
        }
    }
}

/// Finishes runs left behind by processes that died mid-run
async fn recover(orchestrator: &Orchestrator) {
    match orchestrator.recover_interrupted().await {
        Ok(recovered) => {
            for run in &recovered {
                tracing::warn!(
                    "Recovered interrupted run {} on {}: {}",
                    run.id,
                    run.environment,
                    run.status
                );
            }
        }
        Err(e) => tracing::warn!("Recovery of interrupted runs failed: {}", e),
    }
}
