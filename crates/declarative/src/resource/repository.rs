//! Package repository resource

use serde::{Deserialize, Serialize};

use super::{ApplyContext, Converge, ResourceKind};
use crate::error::Result;
use crate::host::Host;
use crate::types::{ApplyResult, Ensure, ResourceState};

/// Where a package source lives and how it is signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySource {
    pub uri: String,
    pub distribution: String,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub keyserver: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

impl RepositorySource {
    /// One-line `deb` entry for this source
    pub fn line(&self) -> String {
        let mut line = format!("deb {} {}", self.uri, self.distribution);
        for component in &self.components {
            line.push(' ');
            line.push_str(component);
        }
        line
    }
}

/// An extra package source registered with the system package manager
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryParams {
    pub name: String,
    pub uri: String,
    pub distribution: String,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub keyserver: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub state: Ensure,
}

impl RepositoryParams {
    pub fn new(
        name: impl Into<String>,
        uri: impl Into<String>,
        distribution: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            distribution: distribution.into(),
            components: Vec::new(),
            keyserver: None,
            key: None,
            state: Ensure::Present,
        }
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.components.push(component.into());
        self
    }

    pub fn signed_by(mut self, keyserver: impl Into<String>, key: impl Into<String>) -> Self {
        self.keyserver = Some(keyserver.into());
        self.key = Some(key.into());
        self
    }

    pub fn source(&self) -> RepositorySource {
        RepositorySource {
            uri: self.uri.clone(),
            distribution: self.distribution.clone(),
            components: self.components.clone(),
            keyserver: self.keyserver.clone(),
            key: self.key.clone(),
        }
    }
}

impl Converge for RepositoryParams {
    fn kind(&self) -> ResourceKind {
        ResourceKind::PackageRepository
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        match self.state {
            Ensure::Present => format!("Add repository {} ({})", self.name, self.source().line()),
            Ensure::Absent => format!("Remove repository {}", self.name),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.key.is_some() != self.keyserver.is_some() {
            return Err("key and keyserver must be given together".to_string());
        }
        Ok(())
    }

    fn current_state(&self, host: &dyn Host) -> Result<ResourceState> {
        let registered = host
            .repository(&self.name)
            .map_err(|e| e.at(self.reference()))?;
        Ok(match registered {
            None => ResourceState::Absent,
            Some(current) if self.state == Ensure::Present && current != self.source() => {
                ResourceState::Modified {
                    from: current.line(),
                    to: self.source().line(),
                }
            }
            Some(current) => ResourceState::present(current.line()),
        })
    }

    fn desired_state(&self) -> ResourceState {
        match self.state {
            Ensure::Present => ResourceState::present(self.source().line()),
            Ensure::Absent => ResourceState::Absent,
        }
    }

    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<ApplyResult> {
        let reference = self.reference();
        let registered = ctx
            .host
            .repository(&self.name)
            .map_err(|e| e.at(&reference))?;
        let wanted = self.source();

        match (self.state, registered) {
            (Ensure::Present, None) => {
                log::info!("Adding repository {}", self.name);
                ctx.host
                    .add_repository(&self.name, &wanted)
                    .map_err(|e| e.at(&reference))?;
                Ok(ApplyResult::Created)
            }
            (Ensure::Present, Some(current)) if current != wanted => {
                log::info!("Updating repository {}", self.name);
                ctx.host
                    .add_repository(&self.name, &wanted)
                    .map_err(|e| e.at(&reference))?;
                Ok(ApplyResult::Modified)
            }
            (Ensure::Absent, Some(_)) => {
                ctx.host
                    .remove_repository(&self.name)
                    .map_err(|e| e.at(&reference))?;
                Ok(ApplyResult::Removed)
            }
            _ => Ok(ApplyResult::NoChange),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;

    fn nginx_repo() -> RepositoryParams {
        RepositoryParams::new("nginx", "http://nginx.org/packages/ubuntu", "jammy")
            .component("nginx")
            .signed_by("keyserver.ubuntu.com", "ABF5BD827BD9BF62")
    }

    #[test]
    fn test_source_line() {
        assert_eq!(
            nginx_repo().source().line(),
            "deb http://nginx.org/packages/ubuntu jammy nginx"
        );
    }

    #[test]
    fn test_add_is_idempotent() {
        let host = MemoryHost::new();
        let ctx = ApplyContext::new(&host);
        let repo = nginx_repo();
        assert_eq!(repo.apply(&ctx).unwrap(), ApplyResult::Created);
        assert_eq!(repo.apply(&ctx).unwrap(), ApplyResult::NoChange);
        assert_eq!(repo.current_state(&host).unwrap(), repo.desired_state());
    }

    #[test]
    fn test_changed_distribution_is_modified() {
        let host = MemoryHost::new();
        let ctx = ApplyContext::new(&host);
        nginx_repo().apply(&ctx).unwrap();

        let mut newer = nginx_repo();
        newer.distribution = "noble".to_string();
        assert_eq!(newer.apply(&ctx).unwrap(), ApplyResult::Modified);
    }

    #[test]
    fn test_key_without_keyserver_is_invalid() {
        let mut repo = nginx_repo();
        repo.keyserver = None;
        assert!(repo.validate().is_err());
    }
}
