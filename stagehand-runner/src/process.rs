//! Application process control
//!
//! Starts and stops the deployed application:
//! - One process per environment, launched in its own process group
//! - Pid recorded in `<state_dir>/<environment>/app.pid` so later invocations can stop it
//! - Output appended to `<state_dir>/<environment>/app.log`
//! - Graceful stop with SIGTERM, escalating to SIGKILL after the stop timeout
//!
//! Signals are delivered by shelling out to `kill`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use stagehand_core::config::{ProcessSettings, Settings};
use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_WAIT: Duration = Duration::from_secs(2);
const LOG_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Process exited during startup ({status}). Log tail:\n{log_tail}")]
    ExitedEarly { status: String, log_tail: String },

    #[error("Process {pid} did not exit after SIGKILL")]
    StopFailed { pid: u32 },

    #[error("Process runtime file error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ProcessError>;

/// A process started by the controller
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub log_file: PathBuf,
}

pub struct ProcessController {
    settings: ProcessSettings,
    state_dir: PathBuf,
    /// Children spawned by this controller, kept so exits can be reaped
    children: Mutex<HashMap<String, Child>>,
}

impl ProcessController {
    pub fn new(settings: &Settings) -> Self {
        Self {
            settings: settings.process.clone(),
            state_dir: settings.state_dir.clone(),
            children: Mutex::new(HashMap::new()),
        }
    }

    pub fn pid_file(&self, environment: &str) -> PathBuf {
        self.state_dir.join(environment).join("app.pid")
    }

    pub fn log_file(&self, environment: &str) -> PathBuf {
        self.state_dir.join(environment).join("app.log")
    }

    /// Starts the application for an environment
    ///
    /// # Arguments
    /// * `environment` - Environment name, used for runtime file paths
    /// * `live_dir` - Working directory of the process
    /// * `env_vars` - Variables added to the process environment
    ///
    /// # Returns
    /// Handle of the started process. A running instance is stopped first. A
    /// process that exits within the start grace period is reported as
    /// [`ProcessError::ExitedEarly`].
    pub async fn start(
        &self,
        environment: &str,
        live_dir: &Path,
        env_vars: &BTreeMap<String, String>,
    ) -> Result<ProcessHandle> {
        if self.is_running(environment) {
            debug!("{} already has a running instance, stopping it first", environment);
            self.stop(environment).await?;
        }

        let log_file = self.log_file(environment);
        if let Some(dir) = log_file.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)?;
        let stderr = stdout.try_clone()?;

        info!(
            "Starting {} {:?} in {} for {}",
            self.settings.program,
            self.settings.args,
            live_dir.display(),
            environment
        );

        let mut command = Command::new(&self.settings.program);
        command
            .args(&self.settings.args)
            .current_dir(live_dir)
            .envs(env_vars)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: self.settings.program.clone(),
            source,
        })?;
        let pid = child.id();
        let started_at = Utc::now();

        tokio::time::sleep(self.settings.start_grace()).await;

        if let Some(status) = child.try_wait()? {
            warn!("Process {} exited during startup: {}", pid, status);
            return Err(ProcessError::ExitedEarly {
                status: status.to_string(),
                log_tail: tail_lines(&log_file, LOG_TAIL_LINES),
            });
        }

        std::fs::write(self.pid_file(environment), pid.to_string())?;
        self.children.lock().insert(environment.to_string(), child);

        info!("Process {} running for {}", pid, environment);
        Ok(ProcessHandle {
            pid,
            started_at,
            log_file,
        })
    }

    /// Stops the application for an environment
    ///
    /// # Returns
    /// `true` if a running process was stopped, `false` if none was running
    pub async fn stop(&self, environment: &str) -> Result<bool> {
        let Some(pid) = self.recorded_pid(environment) else {
            debug!("No pid file for {}, nothing to stop", environment);
            return Ok(false);
        };

        if self.has_exited(environment, pid) {
            debug!("Recorded process {} for {} is not running", pid, environment);
            self.forget(environment);
            return Ok(false);
        }

        info!("Stopping process {} for {}", pid, environment);
        signal(pid, "TERM");

        if !self.wait_for_exit(environment, pid, self.settings.stop_timeout()).await {
            warn!(
                "Process {} ignored SIGTERM for {:?}, sending SIGKILL",
                pid,
                self.settings.stop_timeout()
            );
            signal(pid, "KILL");

            if !self.wait_for_exit(environment, pid, KILL_WAIT).await {
                return Err(ProcessError::StopFailed { pid });
            }
        }

        self.forget(environment);
        info!("Process {} stopped", pid);
        Ok(true)
    }

    /// Whether the recorded process of an environment is alive
    pub fn is_running(&self, environment: &str) -> bool {
        self.recorded_pid(environment)
            .is_some_and(|pid| !self.has_exited(environment, pid))
    }

    fn recorded_pid(&self, environment: &str) -> Option<u32> {
        std::fs::read_to_string(self.pid_file(environment))
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
    }

    /// Checks exit status, reaping our own child so it does not linger as a zombie
    fn has_exited(&self, environment: &str, pid: u32) -> bool {
        let mut children = self.children.lock();
        if let Some(child) = children.get_mut(environment) {
            if child.id() == pid {
                return match child.try_wait() {
                    Ok(Some(_)) => {
                        children.remove(environment);
                        true
                    }
                    Ok(None) => false,
                    Err(_) => !pid_is_alive(pid),
                };
            }
        }
        !pid_is_alive(pid)
    }

    async fn wait_for_exit(&self, environment: &str, pid: u32, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.has_exited(environment, pid) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn forget(&self, environment: &str) {
        self.children.lock().remove(environment);
        if let Err(e) = std::fs::remove_file(self.pid_file(environment)) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove pid file for {}: {}", environment, e);
            }
        }
    }
}

/// Whether a process with this pid exists (`kill -0`)
pub fn pid_is_alive(pid: u32) -> bool {
    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Sends a signal to a process group, falling back to the single process
fn signal(pid: u32, name: &str) {
    let group = format!("-{}", pid);
    let delivered = Command::new("kill")
        .args(["-s", name, "--", &group])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false);

    if delivered {
        return;
    }

    match Command::new("kill")
        .args(["-s", name, &pid.to_string()])
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => {}
        Ok(status) => debug!("kill -s {} {} exited with {}", name, pid, status),
        Err(e) => warn!("Failed to run kill for {}: {}", pid, e),
    }
}

fn tail_lines(path: &Path, lines: usize) -> String {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    let all: Vec<&str> = content.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
