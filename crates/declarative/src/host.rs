//! Host interface
//!
//! Resources never touch the machine directly. Every observation and
//! mutation goes through a [`Host`], so the same recipe can converge a real
//! system (the CLI's system host) or an in-memory one ([`crate::memory`]).

use crate::error::Error;
use crate::resource::database::DbConnection;
use crate::resource::execute::ExecuteParams;
use crate::resource::package::PackageProvider;
use crate::resource::repository::RepositorySource;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Output;
use thiserror::Error;

/// Failure reported by a host operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// Something the operation depends on is missing
    #[error("{0}")]
    Unavailable(String),
    /// The host refused the mutation
    #[error("{0}")]
    PermissionDenied(String),
    /// Any other failure
    #[error("{0}")]
    Failed(String),
}

impl HostError {
    /// Attach the resource reference and map into the crate error taxonomy
    pub fn at(self, resource: impl ToString) -> Error {
        let resource = resource.to_string();
        match self {
            Self::Unavailable(reason) => Error::PreconditionFailed { resource, reason },
            Self::PermissionDenied(reason) => Error::PermissionDenied { resource, reason },
            Self::Failed(reason) => Error::Host { resource, reason },
        }
    }
}

/// Result type for host operations
pub type HostResult<T> = std::result::Result<T, HostError>;

/// What sits at a filesystem path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    File,
    Directory,
    Symlink { target: PathBuf },
}

/// Metadata of a filesystem entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub kind: FileKind,
    pub owner: String,
    pub group: String,
    pub mode: u32,
}

/// Observed state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub enabled: bool,
}

/// Operations delegated to the host's service manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    Start,
    Stop,
    Reload,
    Restart,
    Enable,
    Disable,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Reload => "reload",
            Self::Restart => "restart",
            Self::Enable => "enable",
            Self::Disable => "disable",
        }
    }
}

/// Output from an external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
        }
    }
}

impl CommandOutput {
    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// The machine a convergence run mutates
///
/// Implementations must be safe to share across threads so independent
/// nodes can be converged in parallel; a single host is only ever driven by
/// one engine at a time.
pub trait Host: Send + Sync {
    /// Installed version of a package, `None` when not installed
    fn package_version(&self, name: &str, provider: PackageProvider)
    -> HostResult<Option<String>>;

    /// Install a package, optionally pinned to a version
    fn install_package(
        &self,
        name: &str,
        version: Option<&str>,
        provider: PackageProvider,
    ) -> HostResult<()>;

    fn remove_package(&self, name: &str, provider: PackageProvider) -> HostResult<()>;

    /// Registered package source with the given name
    fn repository(&self, name: &str) -> HostResult<Option<RepositorySource>>;

    /// Register a package source (and its signing key) and refresh the index
    fn add_repository(&self, name: &str, source: &RepositorySource) -> HostResult<()>;

    fn remove_repository(&self, name: &str) -> HostResult<()>;

    /// Metadata of a path without following a final symlink
    fn stat(&self, path: &Path) -> HostResult<Option<FileStat>>;

    fn read_file(&self, path: &Path) -> HostResult<Option<Vec<u8>>>;

    /// Write file contents; the parent directory must exist
    fn write_file(&self, path: &Path, content: &[u8]) -> HostResult<()>;

    fn create_dir(&self, path: &Path, recursive: bool) -> HostResult<()>;

    /// Remove a file, symlink or directory tree
    fn remove(&self, path: &Path) -> HostResult<()>;

    /// Create a symlink at `path` pointing to `to`
    fn symlink(&self, to: &Path, path: &Path) -> HostResult<()>;

    fn set_owner(&self, path: &Path, owner: Option<&str>, group: Option<&str>) -> HostResult<()>;

    fn set_mode(&self, path: &Path, mode: u32) -> HostResult<()>;

    /// Status of a service, `None` when the service manager doesn't know it
    fn service_status(&self, name: &str) -> HostResult<Option<ServiceStatus>>;

    fn control_service(&self, name: &str, action: ServiceAction) -> HostResult<()>;

    fn database_exists(&self, conn: &DbConnection, name: &str) -> HostResult<bool>;

    fn create_database(&self, conn: &DbConnection, name: &str) -> HostResult<()>;

    fn drop_database(&self, conn: &DbConnection, name: &str) -> HostResult<()>;

    fn user_exists(&self, conn: &DbConnection, user: &str) -> HostResult<bool>;

    fn create_user(&self, conn: &DbConnection, user: &str, password: &str) -> HostResult<()>;

    fn drop_user(&self, conn: &DbConnection, user: &str) -> HostResult<()>;

    /// Whether `user` already holds `privileges` on `database`
    fn has_grant(
        &self,
        conn: &DbConnection,
        user: &str,
        database: &str,
        privileges: &[String],
    ) -> HostResult<bool>;

    fn grant(
        &self,
        conn: &DbConnection,
        user: &str,
        database: &str,
        privileges: &[String],
    ) -> HostResult<()>;

    /// Whether an executable is on the search path
    fn command_exists(&self, program: &str) -> bool;

    /// Run a shell command
    fn run_command(&self, command: &ExecuteParams) -> HostResult<CommandOutput>;
}
