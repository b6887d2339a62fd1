use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

const CONFIG_FILE: &str = "config.toml";

/// User configuration (`~/.config/cozinha/config.toml`)
///
/// Every field is optional; command-line flags win over anything set here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Cookbook directory, `~` and `$VARS` allowed
    pub cookbook: Option<String>,
    /// Node name used in reports; defaults to the machine's hostname
    pub node: Option<String>,
    /// Roles applied when `--role` is not given
    pub roles: Vec<String>,
    /// Environment applied when `--environment` is not given
    pub environment: Option<String>,
    /// Recipes converged when `run` gets no arguments
    pub run_list: Vec<String>,
    /// Deadline for a whole run, in seconds
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Load the config from the config directory, or defaults if there is none
    pub fn load() -> Result<Self> {
        let path = paths::config_dir()?.join(CONFIG_FILE);
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Cookbook directory with `~` expanded
    pub fn cookbook_dir(&self) -> Option<PathBuf> {
        self.cookbook.as_deref().map(paths::expand)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Name of this machine, for reports
pub fn hostname() -> String {
    fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_is_default() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
cookbook = "/srv/cookbook"
roles = ["web"]
environment = "production"
run_list = ["base", "nginx"]
timeout_secs = 600
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.cookbook_dir(), Some(PathBuf::from("/srv/cookbook")));
        assert_eq!(config.roles, vec!["web"]);
        assert_eq!(config.environment.as_deref(), Some("production"));
        assert_eq!(config.run_list, vec!["base", "nginx"]);
        assert_eq!(config.timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "cookbok = \"/srv\"\n").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid config file"));
    }
}
