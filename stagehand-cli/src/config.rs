//! Configuration module
//!
//! Locates the settings file and applies command-line overrides.

use stagehand_core::config::{ConfigError, Settings};
use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the TOML settings file
    pub config_path: PathBuf,
    /// State directory given on the command line
    pub state_dir: Option<PathBuf>,
}

impl Config {
    /// Loads, overrides and validates the settings
    pub fn load_settings(&self) -> Result<Settings, ConfigError> {
        let mut settings = Settings::load(&self.config_path)?;
        if let Some(dir) = &self.state_dir {
            settings.state_dir = dir.clone();
        }
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SETTINGS: &str = r#"
        default_environment = "staging"
        branches = { develop = "staging" }

        [environments.staging]
        live_dir = "/srv/app"
        base_url = "http://127.0.0.1:3000"
    "#;

    #[test]
    fn test_state_dir_override() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stagehand.toml");
        std::fs::write(&path, SETTINGS).unwrap();

        let config = Config {
            config_path: path,
            state_dir: Some(dir.path().join("state")),
        };
        let settings = config.load_settings().unwrap();
        assert_eq!(settings.state_dir, dir.path().join("state"));
        assert_eq!(settings.default_environment, "staging");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let config = Config {
            config_path: dir.path().join("absent.toml"),
            state_dir: None,
        };
        assert!(matches!(
            config.load_settings(),
            Err(ConfigError::Read { .. })
        ));
    }
}
