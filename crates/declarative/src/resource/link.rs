//! Symbolic link resource

use serde::Deserialize;
use std::path::PathBuf;

use super::file::kind_name;
use super::{ApplyContext, Converge, ResourceKind};
use crate::error::Result;
use crate::host::{FileKind, Host, HostError};
use crate::types::{ApplyResult, Ensure, ResourceState};

/// A symlink at `path` pointing to `to`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkParams {
    pub path: PathBuf,
    pub to: PathBuf,
    #[serde(default)]
    pub state: Ensure,
}

impl LinkParams {
    pub fn new(path: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            to: to.into(),
            state: Ensure::Present,
        }
    }

    pub fn absent(mut self) -> Self {
        self.state = Ensure::Absent;
        self
    }
}

impl Converge for LinkParams {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Link
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn description(&self) -> String {
        match self.state {
            Ensure::Present => format!("Link {} -> {}", self.path.display(), self.to.display()),
            Ensure::Absent => format!("Remove link {}", self.path.display()),
        }
    }

    fn current_state(&self, host: &dyn Host) -> Result<ResourceState> {
        let stat = host
            .stat(&self.path)
            .map_err(|e| e.at(self.reference()))?;
        Ok(match stat.map(|s| s.kind) {
            None => ResourceState::Absent,
            Some(FileKind::Symlink { target }) if target == self.to => {
                ResourceState::present(format!("-> {}", self.to.display()))
            }
            Some(FileKind::Symlink { target }) => ResourceState::Modified {
                from: format!("-> {}", target.display()),
                to: format!("-> {}", self.to.display()),
            },
            Some(other) => ResourceState::Modified {
                from: kind_name(&other).to_string(),
                to: format!("-> {}", self.to.display()),
            },
        })
    }

    fn desired_state(&self) -> ResourceState {
        match self.state {
            Ensure::Present => ResourceState::present(format!("-> {}", self.to.display())),
            Ensure::Absent => ResourceState::Absent,
        }
    }

    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<ApplyResult> {
        let reference = self.reference();
        let host = ctx.host;
        let current = host
            .stat(&self.path)
            .map_err(|e| e.at(&reference))?
            .map(|s| s.kind);

        match (self.state, current) {
            (Ensure::Present, None) => {
                self.require_target(host)?;
                log::info!("Linking {} -> {}", self.path.display(), self.to.display());
                host.symlink(&self.to, &self.path)
                    .map_err(|e| e.at(&reference))?;
                Ok(ApplyResult::Created)
            }
            (Ensure::Present, Some(FileKind::Symlink { target })) if target == self.to => {
                Ok(ApplyResult::NoChange)
            }
            (Ensure::Present, Some(FileKind::Symlink { .. })) => {
                self.require_target(host)?;
                host.remove(&self.path).map_err(|e| e.at(&reference))?;
                host.symlink(&self.to, &self.path)
                    .map_err(|e| e.at(&reference))?;
                Ok(ApplyResult::Modified)
            }
            (Ensure::Absent, Some(FileKind::Symlink { .. })) => {
                host.remove(&self.path).map_err(|e| e.at(&reference))?;
                Ok(ApplyResult::Removed)
            }
            (Ensure::Absent, None) => Ok(ApplyResult::NoChange),
            (_, Some(other)) => Err(HostError::Unavailable(format!(
                "{} exists and is a {}",
                self.path.display(),
                kind_name(&other)
            ))
            .at(&reference)),
        }
    }
}

impl LinkParams {
    fn require_target(&self, host: &dyn Host) -> Result<()> {
        let reference = self.reference();
        match host.stat(&self.to).map_err(|e| e.at(&reference))? {
            Some(_) => Ok(()),
            None => Err(HostError::Unavailable(format!(
                "link target {} does not exist",
                self.to.display()
            ))
            .at(&reference)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;

    fn site_link() -> LinkParams {
        LinkParams::new(
            "/etc/nginx/sites-enabled/app",
            "/etc/nginx/sites-available/app",
        )
    }

    #[test]
    fn test_create_link() {
        let host = MemoryHost::new()
            .with_file("/etc/nginx/sites-available/app", "server {}")
            .with_dir("/etc/nginx/sites-enabled");
        let ctx = ApplyContext::new(&host);

        assert_eq!(site_link().apply(&ctx).unwrap(), ApplyResult::Created);
        assert_eq!(site_link().apply(&ctx).unwrap(), ApplyResult::NoChange);
        assert!(!site_link().needs_apply(&host).unwrap());
    }

    #[test]
    fn test_missing_target_fails() {
        let host = MemoryHost::new().with_dir("/etc/nginx/sites-enabled");
        let ctx = ApplyContext::new(&host);
        let err = site_link().apply(&ctx).unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");
    }

    #[test]
    fn test_regular_file_in_the_way() {
        let host = MemoryHost::new()
            .with_file("/etc/nginx/sites-available/app", "server {}")
            .with_file("/etc/nginx/sites-enabled/app", "copy");
        let ctx = ApplyContext::new(&host);
        let err = site_link().apply(&ctx).unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");
    }

    #[test]
    fn test_remove_link() {
        let host = MemoryHost::new()
            .with_file("/etc/nginx/sites-available/default", "")
            .with_symlink(
                "/etc/nginx/sites-enabled/default",
                "/etc/nginx/sites-available/default",
            );
        let ctx = ApplyContext::new(&host);
        let link = LinkParams::new(
            "/etc/nginx/sites-enabled/default",
            "/etc/nginx/sites-available/default",
        )
        .absent();
        assert_eq!(link.apply(&ctx).unwrap(), ApplyResult::Removed);
        assert_eq!(link.apply(&ctx).unwrap(), ApplyResult::NoChange);
    }
}
