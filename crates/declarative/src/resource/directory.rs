//! Directory resource

use serde::Deserialize;
use std::path::PathBuf;

use super::file::{attributes_match, ensure_attributes, kind_name};
use super::{ApplyContext, Converge, ResourceKind};
use crate::error::Result;
use crate::host::{FileKind, Host, HostError};
use crate::types::{ApplyResult, Ensure, Mode, ResourceState};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectoryParams {
    pub path: PathBuf,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub mode: Option<Mode>,
    /// Create missing parents (and remove the whole tree when absent)
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub state: Ensure,
}

impl DirectoryParams {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owner: None,
            group: None,
            mode: None,
            recursive: false,
            state: Ensure::Present,
        }
    }

    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    pub fn owner(mut self, owner: impl Into<String>, group: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self.group = Some(group.into());
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(Mode(mode));
        self
    }

    pub fn absent(mut self) -> Self {
        self.state = Ensure::Absent;
        self
    }

    fn summary(&self) -> String {
        let mut parts = vec!["directory".to_string()];
        if let Some(owner) = &self.owner {
            parts.push(format!("owner {owner}"));
        }
        if let Some(group) = &self.group {
            parts.push(format!("group {group}"));
        }
        if let Some(mode) = self.mode {
            parts.push(format!("mode {mode}"));
        }
        parts.join(", ")
    }
}

impl Converge for DirectoryParams {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Directory
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn description(&self) -> String {
        match self.state {
            Ensure::Present => format!("Create directory {}", self.path.display()),
            Ensure::Absent => format!("Remove directory {}", self.path.display()),
        }
    }

    fn current_state(&self, host: &dyn Host) -> Result<ResourceState> {
        let stat = host
            .stat(&self.path)
            .map_err(|e| e.at(self.reference()))?;
        Ok(match stat {
            None => ResourceState::Absent,
            Some(stat) if stat.kind != FileKind::Directory => ResourceState::Modified {
                from: kind_name(&stat.kind).to_string(),
                to: self.summary(),
            },
            Some(_) if self.state == Ensure::Absent => ResourceState::present("directory"),
            Some(stat) => {
                if attributes_match(
                    &stat,
                    self.owner.as_deref(),
                    self.group.as_deref(),
                    self.mode,
                ) {
                    self.desired_state()
                } else {
                    ResourceState::Modified {
                        from: format!(
                            "directory, owner {}, group {}, mode {}",
                            stat.owner,
                            stat.group,
                            Mode(stat.mode)
                        ),
                        to: self.summary(),
                    }
                }
            }
        })
    }

    fn desired_state(&self) -> ResourceState {
        match self.state {
            Ensure::Present => ResourceState::present(self.summary()),
            Ensure::Absent => ResourceState::Absent,
        }
    }

    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<ApplyResult> {
        let reference = self.reference();
        let host = ctx.host;
        let stat = host.stat(&self.path).map_err(|e| e.at(&reference))?;

        match (self.state, stat) {
            (Ensure::Present, None) => {
                log::info!("Creating directory {}", self.path.display());
                host.create_dir(&self.path, self.recursive)
                    .map_err(|e| e.at(&reference))?;
                ensure_attributes(
                    host,
                    &self.path,
                    self.owner.as_deref(),
                    self.group.as_deref(),
                    self.mode,
                )
                .map_err(|e| e.at(&reference))?;
                Ok(ApplyResult::Created)
            }
            (_, Some(stat)) if stat.kind != FileKind::Directory => {
                Err(HostError::Unavailable(format!(
                    "{} exists and is a {}",
                    self.path.display(),
                    kind_name(&stat.kind)
                ))
                .at(&reference))
            }
            (Ensure::Present, Some(_)) => {
                let changed = ensure_attributes(
                    host,
                    &self.path,
                    self.owner.as_deref(),
                    self.group.as_deref(),
                    self.mode,
                )
                .map_err(|e| e.at(&reference))?;
                Ok(if changed {
                    ApplyResult::Modified
                } else {
                    ApplyResult::NoChange
                })
            }
            (Ensure::Absent, Some(_)) => {
                log::info!("Removing directory {}", self.path.display());
                host.remove(&self.path).map_err(|e| e.at(&reference))?;
                Ok(ApplyResult::Removed)
            }
            (Ensure::Absent, None) => Ok(ApplyResult::NoChange),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;
    use std::path::Path;

    #[test]
    fn test_recursive_creates_parents() {
        let host = MemoryHost::new();
        let ctx = ApplyContext::new(&host);
        let dir = DirectoryParams::new("/srv/www/app/static")
            .recursive()
            .owner("www-data", "www-data")
            .mode(0o755);

        assert_eq!(dir.apply(&ctx).unwrap(), ApplyResult::Created);
        assert!(host.stat(Path::new("/srv/www")).unwrap().is_some());
        assert_eq!(dir.current_state(&host).unwrap(), dir.desired_state());
        assert_eq!(dir.apply(&ctx).unwrap(), ApplyResult::NoChange);
    }

    #[test]
    fn test_non_recursive_needs_parent() {
        let host = MemoryHost::new();
        let ctx = ApplyContext::new(&host);
        let err = DirectoryParams::new("/srv/www").apply(&ctx).unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");
    }

    #[test]
    fn test_file_in_the_way() {
        let host = MemoryHost::new().with_file("/srv/www", "oops");
        let ctx = ApplyContext::new(&host);
        let err = DirectoryParams::new("/srv/www").apply(&ctx).unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");
    }

    #[test]
    fn test_owner_drift_is_fixed() {
        let host = MemoryHost::new().with_dir("/var/log/app");
        let ctx = ApplyContext::new(&host);
        let dir = DirectoryParams::new("/var/log/app").owner("app", "adm");
        assert!(dir.needs_apply(&host).unwrap());
        assert_eq!(dir.apply(&ctx).unwrap(), ApplyResult::Modified);
        let stat = host.stat(Path::new("/var/log/app")).unwrap().unwrap();
        assert_eq!(stat.owner, "app");
        assert_eq!(stat.group, "adm");
    }
}
