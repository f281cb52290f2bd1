//! External command execution for stages
//!
//! Runs a configured [`CommandSpec`] to completion with a timeout, capturing
//! its output. A missing program is reported separately so stages can skip
//! optional tooling.

use stagehand_core::config::CommandSpec;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::context::StageRecorder;

/// How a command ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Completed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    /// The program is not installed
    NotFound,
    TimedOut,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        matches!(self, CommandOutcome::Completed { exit_code: 0, .. })
    }
}

/// Runs a command in `cwd` and waits for it
///
/// # Arguments
/// * `spec` - Program and arguments
/// * `cwd` - Working directory
/// * `env` - Extra environment variables
/// * `timeout` - The child is killed when this elapses
pub async fn run_command(
    spec: &CommandSpec,
    cwd: &Path,
    env: &BTreeMap<String, String>,
    timeout: Duration,
) -> io::Result<CommandOutcome> {
    debug!(
        "Running {} ({} {:?}) in {}",
        spec.name,
        spec.program,
        spec.args,
        cwd.display()
    );

    let child = Command::new(&spec.program)
        .args(&spec.args)
        .current_dir(cwd)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CommandOutcome::NotFound),
        Err(e) => return Err(e),
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            Ok(CommandOutcome::Completed {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
        Err(_) => {
            warn!("{} timed out after {:?}", spec.name, timeout);
            Ok(CommandOutcome::TimedOut)
        }
    }
}

/// Runs commands in order, logging into the stage recorder
///
/// Stops at the first failure. Optional commands whose program is missing
/// are skipped with a warning.
pub async fn execute_commands(
    recorder: &StageRecorder,
    commands: &[CommandSpec],
    cwd: &Path,
    env: &BTreeMap<String, String>,
    timeout: Duration,
) -> anyhow::Result<()> {
    for spec in commands {
        recorder.info(format!("$ {} {}", spec.program, spec.args.join(" ")));

        let outcome = run_command(spec, cwd, env, timeout)
            .await
            .map_err(|e| anyhow::anyhow!("{}: failed to run {}: {}", spec.name, spec.program, e))?;

        match outcome {
            CommandOutcome::Completed {
                exit_code,
                stdout,
                stderr,
            } => {
                recorder.output(&stdout);
                recorder.output(&stderr);
                if exit_code != 0 {
                    anyhow::bail!("{} failed with exit code {}", spec.name, exit_code);
                }
                recorder.info(format!("{} passed", spec.name));
            }
            CommandOutcome::NotFound if spec.required => {
                anyhow::bail!("{}: program '{}' not found", spec.name, spec.program);
            }
            CommandOutcome::NotFound => {
                recorder.warn(format!(
                    "{}: program '{}' not found, skipping",
                    spec.name, spec.program
                ));
            }
            CommandOutcome::TimedOut => {
                anyhow::bail!("{} timed out after {}s", spec.name, timeout.as_secs());
            }
        }
    }

    Ok(())
}
