//! Stagehand configuration
//!
//! Defines every tunable of the pipeline: where state lives, which commands
//! the stages run, how the application process is started, what the health
//! prober checks, and where notifications go.
//!
//! Settings are read from a TOML file, then overridden from environment
//! variables, then validated.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::domain::state::DEFAULT_HISTORY_LIMIT;

/// Errors raised while loading or validating settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// An external command run by a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Fail instead of skipping when the program is not installed
    #[serde(default)]
    pub required: bool,
}

impl CommandSpec {
    pub fn new(name: &str, program: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            required: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSettings {
    pub commands: Vec<CommandSpec>,
    pub timeout_secs: u64,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            commands: vec![
                CommandSpec::new("unit", "npm", &["test"]),
                CommandSpec::new("lint", "npx", &["eslint", "."]),
            ],
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Files that must exist in the source directory
    pub required_files: Vec<String>,
    /// Paths copied into the artifact directory and installed by deploy
    pub deploy_paths: Vec<String>,
    pub commands: Vec<CommandSpec>,
    pub timeout_secs: u64,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            required_files: vec![
                "server.js".to_string(),
                "package.json".to_string(),
                "public/index.html".to_string(),
            ],
            deploy_paths: vec![
                "server.js".to_string(),
                "package.json".to_string(),
                "package-lock.json".to_string(),
                "src".to_string(),
                "public".to_string(),
                "node_modules".to_string(),
            ],
            commands: Vec::new(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// File extensions scanned, without the dot
    pub extensions: Vec<String>,
    /// Directory names never descended into
    pub exclude_dirs: Vec<String>,
    /// Files larger than this are skipped
    pub max_file_bytes: u64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            extensions: ["js", "mjs", "cjs", "ts", "json", "env"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            exclude_dirs: ["node_modules", ".git", "coverage", "dist"]
                .iter()
                .map(|d| d.to_string())
                .collect(),
            max_file_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySettings {
    /// Dependency installation, run in the artifact directory
    pub install: Option<CommandSpec>,
    /// Environment configuration file written next to the code
    pub env_file: String,
    /// Persisted data paths; backed up but never overwritten by a deploy
    pub data_paths: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            install: Some(CommandSpec::new(
                "install",
                "npm",
                &["ci", "--omit=dev", "--no-audit"],
            )),
            env_file: ".env".to_string(),
            data_paths: vec!["data".to_string()],
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    pub test: TestSettings,
    pub build: BuildSettings,
    pub security: SecuritySettings,
    pub deploy: DeploySettings,
}

/// How the application process is launched and stopped
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSettings {
    pub program: String,
    pub args: Vec<String>,
    /// Time allowed for a graceful exit before SIGKILL
    pub stop_timeout_secs: u64,
    /// A process exiting within this window counts as a failed start
    pub start_grace_ms: u64,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            program: "node".to_string(),
            args: vec!["server.js".to_string()],
            stop_timeout_secs: 10,
            start_grace_ms: 300,
        }
    }
}

impl ProcessSettings {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn start_grace(&self) -> Duration {
        Duration::from_millis(self.start_grace_ms)
    }
}

/// Endpoints and files the health prober checks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub root_path: String,
    pub api_paths: Vec<String>,
    pub asset_paths: Vec<String>,
    /// JSON data file, relative to the live directory
    pub data_file: String,
    /// Extra attempts per check after the first
    pub retries: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            root_path: "/".to_string(),
            api_paths: vec![
                "/api/poems".to_string(),
                "/api/poems/random".to_string(),
                "/api/poems/templates".to_string(),
            ],
            asset_paths: vec![
                "/index.html".to_string(),
                "/styles.css".to_string(),
                "/app.js".to_string(),
            ],
            data_file: "data/poems.json".to_string(),
            retries: 5,
            backoff_ms: 500,
            max_backoff_ms: 5_000,
            request_timeout_secs: 5,
        }
    }
}

impl HealthSettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Emit notifications through the log
    pub log: bool,
    /// Append notifications as JSON lines to this file
    pub file: Option<PathBuf>,
    /// POST notifications to this URL
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            log: true,
            file: None,
            webhook_url: None,
            webhook_timeout_secs: 10,
        }
    }
}

/// One deployable target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSettings {
    /// Directory the application runs from
    pub live_dir: PathBuf,
    /// Base URL of the running application (e.g., "http://127.0.0.1:3000")
    pub base_url: String,
    /// Written to the environment file and passed to the process
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
}

/// Top-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where state, backups, builds and pid files live
    pub state_dir: PathBuf,
    /// Checkout the pipeline builds from
    pub source_dir: PathBuf,
    pub default_environment: String,
    pub rollback_enabled: bool,
    pub history_limit: usize,
    /// Backups kept per environment after a successful deploy
    pub backup_retention: usize,
    /// Branch name -> environment it deploys to
    pub branches: BTreeMap<String, String>,
    pub stages: StageSettings,
    pub process: ProcessSettings,
    pub health: HealthSettings,
    pub notifications: NotificationSettings,
    pub environments: BTreeMap<String, EnvironmentSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut branches = BTreeMap::new();
        branches.insert("main".to_string(), "production".to_string());
        branches.insert("develop".to_string(), "staging".to_string());

        Self {
            state_dir: PathBuf::from(".stagehand"),
            source_dir: PathBuf::from("."),
            default_environment: "production".to_string(),
            rollback_enabled: true,
            history_limit: DEFAULT_HISTORY_LIMIT,
            backup_retention: 5,
            branches,
            stages: StageSettings::default(),
            process: ProcessSettings::default(),
            health: HealthSettings::default(),
            notifications: NotificationSettings::default(),
            environments: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file, applies environment overrides and validates
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut settings = Self::from_toml_str(&raw)?;
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parses settings without validating them
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Applies overrides from environment variables
    ///
    /// Recognised variables:
    /// - STAGEHAND_STATE_DIR
    /// - STAGEHAND_SOURCE_DIR
    /// - STAGEHAND_ROLLBACK_ENABLED (true/false)
    /// - STAGEHAND_HISTORY_LIMIT
    /// - STAGEHAND_BACKUP_RETENTION
    /// - STAGEHAND_WEBHOOK_URL
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("STAGEHAND_STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }

        if let Some(dir) = lookup("STAGEHAND_SOURCE_DIR") {
            self.source_dir = PathBuf::from(dir);
        }

        if let Some(value) = lookup("STAGEHAND_ROLLBACK_ENABLED") {
            self.rollback_enabled = parse_env("STAGEHAND_ROLLBACK_ENABLED", &value)?;
        }

        if let Some(value) = lookup("STAGEHAND_HISTORY_LIMIT") {
            self.history_limit = parse_env("STAGEHAND_HISTORY_LIMIT", &value)?;
        }

        if let Some(value) = lookup("STAGEHAND_BACKUP_RETENTION") {
            self.backup_retention = parse_env("STAGEHAND_BACKUP_RETENTION", &value)?;
        }

        if let Some(url) = lookup("STAGEHAND_WEBHOOK_URL") {
            self.notifications.webhook_url = Some(url);
        }

        Ok(())
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.environments.is_empty() {
            return Err(invalid("at least one environment must be configured"));
        }

        if !self.environments.contains_key(&self.default_environment) {
            return Err(invalid(format!(
                "default_environment '{}' is not a configured environment",
                self.default_environment
            )));
        }

        for (branch, environment) in &self.branches {
            if !self.environments.contains_key(environment) {
                return Err(invalid(format!(
                    "branch '{}' maps to unknown environment '{}'",
                    branch, environment
                )));
            }
        }

        for (name, env) in &self.environments {
            if !env.base_url.starts_with("http://") && !env.base_url.starts_with("https://") {
                return Err(invalid(format!(
                    "environment '{}': base_url must start with http:// or https://",
                    name
                )));
            }
            if env.live_dir.as_os_str().is_empty() {
                return Err(invalid(format!(
                    "environment '{}': live_dir cannot be empty",
                    name
                )));
            }
        }

        if self.history_limit == 0 {
            return Err(invalid("history_limit must be greater than 0"));
        }

        if self.backup_retention == 0 {
            return Err(invalid("backup_retention must be greater than 0"));
        }

        if self.process.program.is_empty() {
            return Err(invalid("process.program cannot be empty"));
        }

        let health = &self.health;
        for path in std::iter::once(&health.root_path)
            .chain(&health.api_paths)
            .chain(&health.asset_paths)
        {
            if !path.starts_with('/') {
                return Err(invalid(format!("health path '{}' must start with '/'", path)));
            }
        }

        if health.request_timeout_secs == 0 {
            return Err(invalid("health.request_timeout_secs must be greater than 0"));
        }

        for path in self.snapshot_paths() {
            let p = Path::new(&path);
            if p.is_absolute() || p.components().any(|c| c == std::path::Component::ParentDir) {
                return Err(invalid(format!(
                    "path '{}' must be relative to the live directory",
                    path
                )));
            }
        }

        Ok(())
    }

    pub fn environment(&self, name: &str) -> Option<&EnvironmentSettings> {
        self.environments.get(name)
    }

    /// Environment a branch deploys to
    pub fn environment_for_branch(&self, branch: &str) -> Option<&str> {
        self.branches.get(branch).map(String::as_str)
    }

    /// Branch deployed to an environment by default
    pub fn branch_for_environment(&self, environment: &str) -> Option<&str> {
        self.branches
            .iter()
            .find(|(_, env)| env.as_str() == environment)
            .map(|(branch, _)| branch.as_str())
    }

    /// Every path a backup captures: deployed code, env file and persisted data
    pub fn snapshot_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        let candidates = self
            .stages
            .build
            .deploy_paths
            .iter()
            .chain(std::iter::once(&self.stages.deploy.env_file))
            .chain(&self.stages.deploy.data_paths);
        for path in candidates {
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }
        paths
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.state_dir.join("backups")
    }

    pub fn builds_dir(&self) -> PathBuf {
        self.state_dir.join("builds")
    }

    /// Per-environment runtime directory (pid and log files)
    pub fn runtime_dir(&self, environment: &str) -> PathBuf {
        self.state_dir.join(environment)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
state_dir = "/var/lib/stagehand"
backup_retention = 3

[branches]
main = "production"

[process]
program = "node"
args = ["server.js"]

[health]
api_paths = ["/api/poems"]
retries = 2

[environments.production]
live_dir = "/srv/poems"
base_url = "http://127.0.0.1:3000"
env_vars = { NODE_ENV = "production", PORT = "3000" }
"#;

    #[test]
    fn test_parse_sample() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        assert_eq!(settings.state_dir, PathBuf::from("/var/lib/stagehand"));
        assert_eq!(settings.backup_retention, 3);
        assert_eq!(settings.health.api_paths, vec!["/api/poems".to_string()]);
        assert_eq!(settings.health.retries, 2);
        // Unspecified sections fall back to defaults
        assert_eq!(settings.health.data_file, "data/poems.json");
        assert_eq!(settings.history_limit, DEFAULT_HISTORY_LIMIT);

        let production = settings.environment("production").unwrap();
        assert_eq!(production.env_vars.get("PORT"), Some(&"3000".to_string()));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_default_settings_need_an_environment() {
        let settings = Settings::default();
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = Settings::from_toml_str(SAMPLE).unwrap();
        assert!(settings.validate().is_ok());

        settings.branches.insert("develop".to_string(), "staging".to_string());
        assert!(settings.validate().is_err());
        settings.branches.remove("develop");

        settings.health.api_paths.push("api/missing-slash".to_string());
        assert!(settings.validate().is_err());
        settings.health.api_paths.pop();

        settings.stages.deploy.data_paths.push("../outside".to_string());
        assert!(settings.validate().is_err());
        settings.stages.deploy.data_paths.pop();

        if let Some(env) = settings.environments.get_mut("production") {
            env.base_url = "not-a-url".to_string();
        }
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::from_toml_str(SAMPLE).unwrap();
        let vars: HashMap<&str, &str> = [
            ("STAGEHAND_STATE_DIR", "/tmp/state"),
            ("STAGEHAND_ROLLBACK_ENABLED", "false"),
            ("STAGEHAND_HISTORY_LIMIT", "10"),
            ("STAGEHAND_WEBHOOK_URL", "https://hooks.example.com/x"),
        ]
        .into_iter()
        .collect();

        settings
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.state_dir, PathBuf::from("/tmp/state"));
        assert!(!settings.rollback_enabled);
        assert_eq!(settings.history_limit, 10);
        assert_eq!(
            settings.notifications.webhook_url.as_deref(),
            Some("https://hooks.example.com/x")
        );
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut settings = Settings::from_toml_str(SAMPLE).unwrap();
        let result = settings.apply_env(|key| {
            (key == "STAGEHAND_BACKUP_RETENTION").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_branch_mapping() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        assert_eq!(settings.environment_for_branch("main"), Some("production"));
        assert_eq!(settings.branch_for_environment("production"), Some("main"));
        assert_eq!(settings.environment_for_branch("feature/x"), None);
    }

    #[test]
    fn test_snapshot_paths_cover_code_env_and_data() {
        let settings = Settings::default();
        let paths = settings.snapshot_paths();
        assert!(paths.contains(&"server.js".to_string()));
        assert!(paths.contains(&".env".to_string()));
        assert!(paths.contains(&"data".to_string()));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stagehand.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert!(settings.environment("production").is_some());

        let missing = Settings::load(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
