//! Package resource

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ApplyContext, Converge, ResourceKind};
use crate::error::Result;
use crate::host::Host;
use crate::types::{ApplyResult, ResourceState};

/// Package manager that owns a package
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageProvider {
    /// The distribution package manager
    #[default]
    #[serde(alias = "apt")]
    System,
    /// Python packages installed with pip
    Pip,
}

impl fmt::Display for PackageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("system"),
            Self::Pip => f.write_str("pip"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageState {
    #[default]
    Installed,
    Removed,
}

/// A package that should be installed (optionally at a version) or removed
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageParams {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub state: PackageState,
    #[serde(default)]
    pub provider: PackageProvider,
}

impl PackageParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            state: PackageState::Installed,
            provider: PackageProvider::System,
        }
    }

    pub fn pip(name: impl Into<String>) -> Self {
        Self {
            provider: PackageProvider::Pip,
            ..Self::new(name)
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn removed(mut self) -> Self {
        self.state = PackageState::Removed;
        self
    }
}

impl Converge for PackageParams {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Package
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        let target = match &self.version {
            Some(v) => format!("{} {}", self.name, v),
            None => self.name.clone(),
        };
        match self.state {
            PackageState::Installed => format!("Install {target} ({})", self.provider),
            PackageState::Removed => format!("Remove {} ({})", self.name, self.provider),
        }
    }

    fn current_state(&self, host: &dyn Host) -> Result<ResourceState> {
        let installed = host
            .package_version(&self.name, self.provider)
            .map_err(|e| e.at(self.reference()))?;

        Ok(match (installed, self.state) {
            (None, _) => ResourceState::Absent,
            (Some(current), PackageState::Installed) => match &self.version {
                Some(wanted) if *wanted != current => ResourceState::Modified {
                    from: current,
                    to: wanted.clone(),
                },
                _ => self.desired_state(),
            },
            (Some(current), PackageState::Removed) => ResourceState::present(current),
        })
    }

    fn desired_state(&self) -> ResourceState {
        match self.state {
            PackageState::Installed => {
                ResourceState::present(self.version.as_deref().unwrap_or("installed"))
            }
            PackageState::Removed => ResourceState::Absent,
        }
    }

    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<ApplyResult> {
        let reference = self.reference();
        let host = ctx.host;
        let installed = host
            .package_version(&self.name, self.provider)
            .map_err(|e| e.at(&reference))?;

        match (self.state, installed) {
            (PackageState::Installed, None) => {
                log::info!("Installing {}", self.name);
                host.install_package(&self.name, self.version.as_deref(), self.provider)
                    .map_err(|e| e.at(&reference))?;
                Ok(ApplyResult::Created)
            }
            (PackageState::Installed, Some(current)) => match &self.version {
                Some(wanted) if *wanted != current => {
                    log::info!("Upgrading {} {} -> {}", self.name, current, wanted);
                    host.install_package(&self.name, Some(wanted), self.provider)
                        .map_err(|e| e.at(&reference))?;
                    Ok(ApplyResult::Modified)
                }
                _ => Ok(ApplyResult::NoChange),
            },
            (PackageState::Removed, Some(_)) => {
                log::info!("Removing {}", self.name);
                host.remove_package(&self.name, self.provider)
                    .map_err(|e| e.at(&reference))?;
                Ok(ApplyResult::Removed)
            }
            (PackageState::Removed, None) => Ok(ApplyResult::NoChange),
        }
    }
}
