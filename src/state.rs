use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use declarative::RunReport;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths;

const LAST_RUN_FILE: &str = "last-run.json";

/// The most recent `run`, kept so `status` can show it later
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastRun {
    pub finished_at: DateTime<Utc>,
    pub cookbook: PathBuf,
    pub run_list: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub environment: Option<String>,
    pub report: RunReport,
}

impl LastRun {
    pub fn new(
        cookbook: &Path,
        run_list: &[String],
        roles: &[String],
        environment: Option<&str>,
        report: RunReport,
    ) -> Self {
        Self {
            finished_at: Utc::now(),
            cookbook: cookbook.to_path_buf(),
            run_list: run_list.to_vec(),
            roles: roles.to_vec(),
            environment: environment.map(str::to_string),
            report,
        }
    }

    fn state_file() -> Result<PathBuf> {
        Ok(paths::state_dir()?.join(LAST_RUN_FILE))
    }

    /// Load the last run, `None` if nothing has run yet
    pub fn load() -> Result<Option<Self>> {
        Self::load_from(&Self::state_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            log::debug!("State file does not exist");
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let state = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;
        log::debug!("Loaded state from {}", path.display());
        Ok(Some(state))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::state_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| {
                format!("Failed to create state directory: {}", dir.display())
            })?;
        }

        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;

        log::debug!("Saved state to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{
        ApplyResult, Error, Outcome, RecipeReport, ResourceKind, ResourceRef, ResourceReport,
    };
    use std::time::Duration;
    use tempfile::TempDir;

    fn sample_report() -> RunReport {
        let mut report = RunReport::new("web1", false);
        let mut recipe = RecipeReport::new("nginx");
        recipe.resources.push(ResourceReport {
            resource: ResourceRef::new(ResourceKind::Package, "nginx"),
            description: "Install package nginx".to_string(),
            outcome: Outcome::Converged {
                result: ApplyResult::Created,
            },
            elapsed: Duration::from_millis(1200),
        });
        recipe.resources.push(ResourceReport {
            resource: ResourceRef::new(ResourceKind::Service, "nginx"),
            description: "Start service nginx".to_string(),
            outcome: Outcome::Failed {
                error: Error::PermissionDenied {
                    resource: "service[nginx]".to_string(),
                    reason: "interactive authentication required".to_string(),
                },
            },
            elapsed: Duration::from_millis(40),
        });
        report.recipes.push(recipe);
        report
    }

    #[test]
    fn test_missing_state_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded = LastRun::load_from(&dir.path().join("last-run.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("last-run.json");
        let run = LastRun::new(
            Path::new("/srv/cookbook"),
            &["nginx".to_string()],
            &["web".to_string()],
            Some("production"),
            sample_report(),
        );
        run.save_to(&path).unwrap();

        let loaded = LastRun::load_from(&path).unwrap().unwrap();
        assert_eq!(loaded.report, run.report);
        assert_eq!(loaded.environment.as_deref(), Some("production"));
        assert_eq!(loaded.report.exit_code(), 1);
        assert_eq!(loaded.report.summary().failed, 1);
    }
}
