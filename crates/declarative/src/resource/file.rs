//! File resource and the content/ownership helpers shared with templates

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::{ApplyContext, Converge, ResourceKind};
use crate::error::Result;
use crate::host::{FileKind, FileStat, Host, HostError, HostResult};
use crate::types::{ApplyResult, Ensure, Mode, ResourceState};

/// A file with literal content
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileParams {
    pub path: PathBuf,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub state: Ensure,
}

impl FileParams {
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            owner: None,
            group: None,
            mode: None,
            state: Ensure::Present,
        }
    }

    pub fn absent(path: impl Into<PathBuf>) -> Self {
        Self {
            state: Ensure::Absent,
            ..Self::new(path, "")
        }
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

    fn managed(&self) -> ManagedFile<'_> {
        ManagedFile {
            path: &self.path,
            content: self.content.as_bytes(),
            owner: self.owner.as_deref(),
            group: self.group.as_deref(),
            mode: self.mode,
        }
    }
}

impl Converge for FileParams {
    fn kind(&self) -> ResourceKind {
        ResourceKind::File
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn description(&self) -> String {
        match self.state {
            Ensure::Present => format!("Write {}", self.path.display()),
            Ensure::Absent => format!("Remove {}", self.path.display()),
        }
    }

    fn current_state(&self, host: &dyn Host) -> Result<ResourceState> {
        let managed = self.managed();
        match self.state {
            Ensure::Present => managed.observe(host),
            Ensure::Absent => managed.observe_presence(host),
        }
        .map_err(|e| e.at(self.reference()))
    }

    fn desired_state(&self) -> ResourceState {
        match self.state {
            Ensure::Present => self.managed().desired(),
            Ensure::Absent => ResourceState::Absent,
        }
    }

    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<ApplyResult> {
        let managed = self.managed();
        match self.state {
            Ensure::Present => managed.converge(ctx.host),
            Ensure::Absent => managed.remove(ctx.host),
        }
        .map_err(|e| e.at(self.reference()))
    }
}

/// A regular file whose content and attributes are managed
pub(crate) struct ManagedFile<'a> {
    pub path: &'a Path,
    pub content: &'a [u8],
    pub owner: Option<&'a str>,
    pub group: Option<&'a str>,
    pub mode: Option<Mode>,
}

impl ManagedFile<'_> {
    pub fn desired(&self) -> ResourceState {
        ResourceState::present(summarize(
            self.content,
            self.owner,
            self.group,
            self.mode.map(|m| m.0),
        ))
    }

    pub fn observe(&self, host: &dyn Host) -> HostResult<ResourceState> {
        let Some(stat) = host.stat(self.path)? else {
            return Ok(ResourceState::Absent);
        };
        let wanted = self.desired();
        let ResourceState::Present {
            details: Some(wanted_summary),
        } = &wanted
        else {
            return Ok(ResourceState::Unknown);
        };

        if stat.kind != FileKind::File {
            return Ok(ResourceState::Modified {
                from: kind_name(&stat.kind).to_string(),
                to: wanted_summary.clone(),
            });
        }

        let current = host.read_file(self.path)?.unwrap_or_default();
        let summary = summarize(
            &current,
            self.owner.map(|_| stat.owner.as_str()),
            self.group.map(|_| stat.group.as_str()),
            self.mode.map(|_| stat.mode),
        );
        if summary == *wanted_summary {
            Ok(wanted)
        } else {
            Ok(ResourceState::Modified {
                from: summary,
                to: wanted_summary.clone(),
            })
        }
    }

    pub fn observe_presence(&self, host: &dyn Host) -> HostResult<ResourceState> {
        Ok(match host.stat(self.path)? {
            Some(stat) => ResourceState::present(kind_name(&stat.kind)),
            None => ResourceState::Absent,
        })
    }

    pub fn converge(&self, host: &dyn Host) -> HostResult<ApplyResult> {
        match host.stat(self.path)? {
            None => {
                log::info!("Creating {}", self.path.display());
                host.write_file(self.path, self.content)?;
                ensure_attributes(host, self.path, self.owner, self.group, self.mode)?;
                Ok(ApplyResult::Created)
            }
            Some(stat) if stat.kind != FileKind::File => Err(HostError::Unavailable(format!(
                "{} exists and is a {}",
                self.path.display(),
                kind_name(&stat.kind)
            ))),
            Some(_) => {
                let current = host.read_file(self.path)?.unwrap_or_default();
                let mut changed = false;
                if current != self.content {
                    log::info!("Updating {}", self.path.display());
                    host.write_file(self.path, self.content)?;
                    changed = true;
                }
                changed |= ensure_attributes(host, self.path, self.owner, self.group, self.mode)?;
                Ok(if changed {
                    ApplyResult::Modified
                } else {
                    ApplyResult::NoChange
                })
            }
        }
    }

    pub fn remove(&self, host: &dyn Host) -> HostResult<ApplyResult> {
        match host.stat(self.path)? {
            None => Ok(ApplyResult::NoChange),
            Some(stat) if stat.kind == FileKind::Directory => Err(HostError::Unavailable(format!(
                "{} is a directory",
                self.path.display()
            ))),
            Some(_) => {
                log::info!("Removing {}", self.path.display());
                host.remove(self.path)?;
                Ok(ApplyResult::Removed)
            }
        }
    }
}

/// Bring owner, group and mode in line with what was asked for
///
/// Returns whether anything changed. Unset attributes are left alone.
pub(crate) fn ensure_attributes(
    host: &dyn Host,
    path: &Path,
    owner: Option<&str>,
    group: Option<&str>,
    mode: Option<Mode>,
) -> HostResult<bool> {
    let Some(stat) = host.stat(path)? else {
        return Err(HostError::Failed(format!(
            "{} disappeared while setting attributes",
            path.display()
        )));
    };
    let mut changed = false;

    let owner = owner.filter(|o| *o != stat.owner);
    let group = group.filter(|g| *g != stat.group);
    if owner.is_some() || group.is_some() {
        host.set_owner(path, owner, group)?;
        changed = true;
    }
    if let Some(mode) = mode
        && mode.0 != stat.mode
    {
        host.set_mode(path, mode.0)?;
        changed = true;
    }
    Ok(changed)
}

/// Whether the stat already carries the requested attributes
pub(crate) fn attributes_match(
    stat: &FileStat,
    owner: Option<&str>,
    group: Option<&str>,
    mode: Option<Mode>,
) -> bool {
    owner.is_none_or(|o| o == stat.owner)
        && group.is_none_or(|g| g == stat.group)
        && mode.is_none_or(|m| m.0 == stat.mode)
}

pub(crate) fn kind_name(kind: &FileKind) -> &'static str {
    match kind {
        FileKind::File => "file",
        FileKind::Directory => "directory",
        FileKind::Symlink { .. } => "symlink",
    }
}

fn summarize(
    content: &[u8],
    owner: Option<&str>,
    group: Option<&str>,
    mode: Option<u32>,
) -> String {
    let digest = blake3::hash(content).to_hex();
    let mut summary = format!("{} bytes, blake3 {}", content.len(), &digest.as_str()[..12]);
    if let Some(owner) = owner {
        summary.push_str(&format!(", owner {owner}"));
    }
    if let Some(group) = group {
        summary.push_str(&format!(", group {group}"));
    }
    if let Some(mode) = mode {
        summary.push_str(&format!(", mode {}", Mode(mode)));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;

    #[test]
    fn test_create_and_converge_again() {
        let host = MemoryHost::new().with_dir("/etc");
        let ctx = ApplyContext::new(&host);
        let file = FileParams::new("/etc/motd", "hello\n").mode(0o600);

        assert_eq!(file.current_state(&host).unwrap(), ResourceState::Absent);
        assert_eq!(file.apply(&ctx).unwrap(), ApplyResult::Created);
        assert_eq!(file.current_state(&host).unwrap(), file.desired_state());
        assert_eq!(file.apply(&ctx).unwrap(), ApplyResult::NoChange);
        assert_eq!(host.file_content("/etc/motd").as_deref(), Some("hello\n"));
    }

    #[test]
    fn test_drifted_content_is_rewritten() {
        let host = MemoryHost::new().with_file("/etc/motd", "old");
        let ctx = ApplyContext::new(&host);
        let file = FileParams::new("/etc/motd", "new");

        assert!(matches!(
            file.current_state(&host).unwrap(),
            ResourceState::Modified { .. }
        ));
        assert_eq!(file.apply(&ctx).unwrap(), ApplyResult::Modified);
        assert_eq!(host.file_content("/etc/motd").as_deref(), Some("new"));
    }

    #[test]
    fn test_only_mode_differs() {
        let host = MemoryHost::new().with_file("/etc/motd", "same");
        let ctx = ApplyContext::new(&host);
        let file = FileParams::new("/etc/motd", "same").mode(0o640);
        assert_eq!(file.apply(&ctx).unwrap(), ApplyResult::Modified);
        assert_eq!(host.stat(Path::new("/etc/motd")).unwrap().unwrap().mode, 0o640);
    }

    #[test]
    fn test_missing_parent_is_precondition_failure() {
        let host = MemoryHost::new();
        let ctx = ApplyContext::new(&host);
        let err = FileParams::new("/srv/app/config.ini", "x").apply(&ctx).unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");
    }

    #[test]
    fn test_read_only_path_is_permission_denied() {
        let host = MemoryHost::new().with_dir("/usr").with_read_only("/usr");
        let ctx = ApplyContext::new(&host);
        let err = FileParams::new("/usr/motd", "x").apply(&ctx).unwrap_err();
        assert_eq!(err.kind(), "permission_denied");
    }

    #[test]
    fn test_absent() {
        let host = MemoryHost::new().with_file("/etc/default/site", "x");
        let ctx = ApplyContext::new(&host);
        let file = FileParams::absent("/etc/default/site");
        assert_eq!(file.apply(&ctx).unwrap(), ApplyResult::Removed);
        assert_eq!(file.apply(&ctx).unwrap(), ApplyResult::NoChange);
    }

    #[test]
    fn test_attributes_match_ignores_unset() {
        let stat = FileStat {
            kind: FileKind::File,
            owner: "www-data".into(),
            group: "www-data".into(),
            mode: 0o644,
        };
        assert!(attributes_match(&stat, None, None, None));
        assert!(attributes_match(&stat, Some("www-data"), None, Some(Mode(0o644))));
        assert!(!attributes_match(&stat, Some("root"), None, None));
    }
}
