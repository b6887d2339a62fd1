//! Centralized path resolution for cozinha
//!
//! # Environment Variables
//!
//! - `COZINHA_CONFIG_DIR` - Override config directory
//! - `COZINHA_STATE_DIR` - Override state directory (last run report)
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `COZINHA_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/cozinha` (if set)
//! 3. `~/.config/cozinha`
//!
//! For state_dir():
//! 1. `COZINHA_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/cozinha` (if set)
//! 3. `~/.local/state/cozinha`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "COZINHA_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "COZINHA_STATE_DIR";

const APP: &str = "cozinha";

/// Get the cozinha config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using config dir from {}: {}",
            ENV_CONFIG_DIR,
            path.display()
        );
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join(APP);
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the cozinha state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join(APP);
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Expand ~ and environment variables in a path string.
///
/// Unknown variables leave the input untouched.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_with_tilde() {
        let result = expand("~/cookbooks/web");
        let home = dirs::home_dir().unwrap();
        assert_eq!(result, home.join("cookbooks").join("web"));
    }

    #[test]
    fn test_expand_absolute() {
        assert_eq!(expand("/srv/cookbook"), PathBuf::from("/srv/cookbook"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_COZINHA_VAR_12345/file");
        assert_eq!(
            result,
            PathBuf::from("/path/$NONEXISTENT_COZINHA_VAR_12345/file")
        );
    }

    #[test]
    fn test_env_var_constants() {
        assert_eq!(ENV_CONFIG_DIR, "COZINHA_CONFIG_DIR");
        assert_eq!(ENV_STATE_DIR, "COZINHA_STATE_DIR");
    }
}
