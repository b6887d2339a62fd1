//! In-memory host
//!
//! A simulated machine that resources can converge without touching the real
//! system: packages, package sources, a filesystem tree, services, database
//! servers and a command table. Every mutation is appended to a journal, so
//! tests can assert that a second run changes nothing.

use crate::host::{
    CommandOutput, FileKind, FileStat, Host, HostError, HostResult, ServiceAction, ServiceStatus,
};
use crate::resource::database::DbConnection;
use crate::resource::execute::ExecuteParams;
use crate::resource::package::PackageProvider;
use crate::resource::repository::RepositorySource;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir,
    Symlink(PathBuf),
}

#[derive(Debug, Clone)]
struct Entry {
    node: Node,
    owner: String,
    group: String,
    mode: u32,
}

impl Entry {
    fn new(node: Node) -> Self {
        let mode = match node {
            Node::File(_) => 0o644,
            Node::Dir => 0o755,
            Node::Symlink(_) => 0o777,
        };
        Self {
            node,
            owner: "root".to_string(),
            group: "root".to_string(),
            mode,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct DbServer {
    databases: BTreeSet<String>,
    users: BTreeMap<String, String>,
    /// (user, database, privilege)
    grants: BTreeSet<(String, String, String)>,
}

/// State of the simulated machine
#[derive(Debug, Default)]
pub struct Machine {
    installed: BTreeMap<(PackageProvider, String), String>,
    available: BTreeMap<(PackageProvider, String), String>,
    package_services: BTreeMap<String, Vec<String>>,
    repositories: BTreeMap<String, RepositorySource>,
    entries: BTreeMap<PathBuf, Entry>,
    read_only: Vec<PathBuf>,
    services: BTreeMap<String, ServiceStatus>,
    service_log: BTreeMap<String, Vec<ServiceAction>>,
    binaries: BTreeSet<String>,
    command_results: BTreeMap<String, bool>,
    commands: Vec<String>,
    servers: BTreeMap<String, DbServer>,
    install_delay: Duration,
    journal: Vec<String>,
}

impl Machine {
    /// Create a directory and any missing parents
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut missing: Vec<PathBuf> = path
            .ancestors()
            .filter(|p| !self.exists(p))
            .map(Path::to_path_buf)
            .collect();
        missing.reverse();
        for dir in missing {
            self.entries.insert(dir, Entry::new(Node::Dir));
        }
    }

    /// Create a file (and its parent directories) with the given content
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.add_dir(parent);
        }
        self.entries
            .insert(path.to_path_buf(), Entry::new(Node::File(content.into())));
    }

    fn exists(&self, path: &Path) -> bool {
        path.parent().is_none() || path.as_os_str().is_empty() || self.entries.contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.parent().is_none()
            || path.as_os_str().is_empty()
            || matches!(self.entries.get(path), Some(Entry { node: Node::Dir, .. }))
    }

    fn check_writable(&self, path: &Path) -> HostResult<()> {
        if self.read_only.iter().any(|prefix| path.starts_with(prefix)) {
            return Err(HostError::PermissionDenied(format!(
                "{} is on a read-only path",
                path.display()
            )));
        }
        Ok(())
    }

    fn check_parent(&self, path: &Path) -> HostResult<()> {
        match path.parent() {
            Some(parent) if !self.is_dir(parent) => Err(HostError::Unavailable(format!(
                "parent directory {} does not exist",
                parent.display()
            ))),
            _ => Ok(()),
        }
    }

    fn server(&self, conn: &DbConnection) -> HostResult<&DbServer> {
        self.servers.get(&conn.endpoint()).ok_or_else(|| {
            HostError::Unavailable(format!(
                "cannot connect to database server at {}",
                conn.endpoint()
            ))
        })
    }

    fn server_mut(&mut self, conn: &DbConnection) -> HostResult<&mut DbServer> {
        self.servers.get_mut(&conn.endpoint()).ok_or_else(|| {
            HostError::Unavailable(format!(
                "cannot connect to database server at {}",
                conn.endpoint()
            ))
        })
    }

    fn record(&mut self, entry: String) {
        log::trace!("memory host: {entry}");
        self.journal.push(entry);
    }
}

type CommandEffect = Box<dyn Fn(&mut Machine) + Send + Sync>;

/// Simulated machine implementing [`Host`]
#[derive(Default)]
pub struct MemoryHost {
    machine: Mutex<Machine>,
    effects: BTreeMap<String, CommandEffect>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn machine(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A system package the configured repositories can install
    pub fn with_available_package(self, name: &str, version: &str) -> Self {
        self.machine()
            .available
            .insert((PackageProvider::System, name.to_string()), version.to_string());
        self
    }

    pub fn with_available_pip_package(self, name: &str, version: &str) -> Self {
        self.machine()
            .available
            .insert((PackageProvider::Pip, name.to_string()), version.to_string());
        self
    }

    /// An already installed system package
    pub fn with_package(self, name: &str, version: &str) -> Self {
        {
            let mut machine = self.machine();
            machine
                .installed
                .insert((PackageProvider::System, name.to_string()), version.to_string());
            machine
                .available
                .entry((PackageProvider::System, name.to_string()))
                .or_insert_with(|| version.to_string());
        }
        self
    }

    /// Installing `package` registers `service`, stopped and disabled
    pub fn with_package_service(self, package: &str, service: &str) -> Self {
        self.machine()
            .package_services
            .entry(package.to_string())
            .or_default()
            .push(service.to_string());
        self
    }

    pub fn with_dir(self, path: impl AsRef<Path>) -> Self {
        self.machine().add_dir(path);
        self
    }

    pub fn with_file(self, path: impl AsRef<Path>, content: &str) -> Self {
        self.machine().add_file(path, content);
        self
    }

    pub fn with_symlink(self, path: impl AsRef<Path>, to: impl AsRef<Path>) -> Self {
        {
            let mut machine = self.machine();
            let path = path.as_ref();
            if let Some(parent) = path.parent() {
                machine.add_dir(parent);
            }
            machine.entries.insert(
                path.to_path_buf(),
                Entry::new(Node::Symlink(to.as_ref().to_path_buf())),
            );
        }
        self
    }

    /// Mutations under `prefix` are refused with a permission error
    pub fn with_read_only(self, prefix: impl AsRef<Path>) -> Self {
        self.machine().read_only.push(prefix.as_ref().to_path_buf());
        self
    }

    pub fn with_service(self, name: &str, running: bool, enabled: bool) -> Self {
        self.machine()
            .services
            .insert(name.to_string(), ServiceStatus { running, enabled });
        self
    }

    pub fn with_binary(self, program: &str) -> Self {
        self.machine().binaries.insert(program.to_string());
        self
    }

    /// Exit status of a command; unknown commands succeed
    pub fn with_command_result(self, command: &str, success: bool) -> Self {
        self.machine()
            .command_results
            .insert(command.to_string(), success);
        self
    }

    /// Side effect applied to the machine when `command` runs
    pub fn on_command<F>(mut self, command: &str, effect: F) -> Self
    where
        F: Fn(&mut Machine) + Send + Sync + 'static,
    {
        self.effects.insert(command.to_string(), Box::new(effect));
        self
    }

    /// Database server reachable at `host:port`
    pub fn with_database_server(self, endpoint: &str) -> Self {
        self.machine()
            .servers
            .insert(endpoint.to_string(), DbServer::default());
        self
    }

    /// Make every package install take this long
    pub fn with_install_delay(self, delay: Duration) -> Self {
        self.machine().install_delay = delay;
        self
    }

    pub fn file_content(&self, path: impl AsRef<Path>) -> Option<String> {
        match self.machine().entries.get(path.as_ref()) {
            Some(Entry {
                node: Node::File(bytes),
                ..
            }) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    /// Service manager calls made for a service, in order
    pub fn service_actions(&self, name: &str) -> Vec<ServiceAction> {
        self.machine()
            .service_log
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Every command run, guards included
    pub fn commands_run(&self) -> Vec<String> {
        self.machine().commands.clone()
    }

    /// Every mutation made so far
    pub fn journal(&self) -> Vec<String> {
        self.machine().journal.clone()
    }
}

impl Host for MemoryHost {
    fn package_version(
        &self,
        name: &str,
        provider: PackageProvider,
    ) -> HostResult<Option<String>> {
        Ok(self
            .machine()
            .installed
            .get(&(provider, name.to_string()))
            .cloned())
    }

    fn install_package(
        &self,
        name: &str,
        version: Option<&str>,
        provider: PackageProvider,
    ) -> HostResult<()> {
        let delay = {
            let mut machine = self.machine();
            let key = (provider, name.to_string());
            let Some(available) = machine.available.get(&key).cloned() else {
                return Err(HostError::Unavailable(format!(
                    "package {name} is not available from any {provider} source"
                )));
            };
            let version = version.map_or(available, str::to_string);
            machine.record(format!("install {provider} {name} {version}"));
            machine.installed.insert(key, version);

            let services = machine
                .package_services
                .get(name)
                .cloned()
                .unwrap_or_default();
            for service in services {
                machine.services.entry(service).or_insert(ServiceStatus {
                    running: false,
                    enabled: false,
                });
            }
            machine.install_delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(())
    }

    fn remove_package(&self, name: &str, provider: PackageProvider) -> HostResult<()> {
        let mut machine = self.machine();
        machine.installed.remove(&(provider, name.to_string()));
        machine.record(format!("remove {provider} {name}"));
        Ok(())
    }

    fn repository(&self, name: &str) -> HostResult<Option<RepositorySource>> {
        Ok(self.machine().repositories.get(name).cloned())
    }

    fn add_repository(&self, name: &str, source: &RepositorySource) -> HostResult<()> {
        let mut machine = self.machine();
        machine
            .repositories
            .insert(name.to_string(), source.clone());
        machine.record(format!("add repository {name}: {}", source.line()));
        Ok(())
    }

    fn remove_repository(&self, name: &str) -> HostResult<()> {
        let mut machine = self.machine();
        machine.repositories.remove(name);
        machine.record(format!("remove repository {name}"));
        Ok(())
    }

    fn stat(&self, path: &Path) -> HostResult<Option<FileStat>> {
        let machine = self.machine();
        if machine.is_dir(path) && !machine.entries.contains_key(path) {
            return Ok(Some(FileStat {
                kind: FileKind::Directory,
                owner: "root".to_string(),
                group: "root".to_string(),
                mode: 0o755,
            }));
        }
        Ok(machine.entries.get(path).map(|entry| FileStat {
            kind: match &entry.node {
                Node::File(_) => FileKind::File,
                Node::Dir => FileKind::Directory,
                Node::Symlink(target) => FileKind::Symlink {
                    target: target.clone(),
                },
            },
            owner: entry.owner.clone(),
            group: entry.group.clone(),
            mode: entry.mode,
        }))
    }

    fn read_file(&self, path: &Path) -> HostResult<Option<Vec<u8>>> {
        let machine = self.machine();
        let mut current = path.to_path_buf();
        // Follow a bounded chain of symlinks
        for _ in 0..8 {
            match machine.entries.get(&current).map(|e| &e.node) {
                None => return Ok(None),
                Some(Node::File(bytes)) => return Ok(Some(bytes.clone())),
                Some(Node::Dir) => {
                    return Err(HostError::Failed(format!(
                        "{} is a directory",
                        path.display()
                    )));
                }
                Some(Node::Symlink(target)) => current = target.clone(),
            }
        }
        Err(HostError::Failed(format!(
            "too many levels of symbolic links at {}",
            path.display()
        )))
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> HostResult<()> {
        let mut machine = self.machine();
        machine.check_writable(path)?;
        machine.check_parent(path)?;
        match machine.entries.get_mut(path) {
            Some(Entry {
                node: Node::File(bytes),
                ..
            }) => *bytes = content.to_vec(),
            Some(_) => {
                return Err(HostError::Failed(format!(
                    "{} is not a regular file",
                    path.display()
                )));
            }
            None => {
                machine
                    .entries
                    .insert(path.to_path_buf(), Entry::new(Node::File(content.to_vec())));
            }
        }
        machine.record(format!("write {} ({} bytes)", path.display(), content.len()));
        Ok(())
    }

    fn create_dir(&self, path: &Path, recursive: bool) -> HostResult<()> {
        let mut machine = self.machine();
        machine.check_writable(path)?;
        if machine.exists(path) {
            return Err(HostError::Failed(format!("{} already exists", path.display())));
        }
        if recursive {
            machine.add_dir(path);
        } else {
            machine.check_parent(path)?;
            machine
                .entries
                .insert(path.to_path_buf(), Entry::new(Node::Dir));
        }
        machine.record(format!("mkdir {}", path.display()));
        Ok(())
    }

    fn remove(&self, path: &Path) -> HostResult<()> {
        let mut machine = self.machine();
        machine.check_writable(path)?;
        machine.entries.retain(|p, _| !p.starts_with(path));
        machine.record(format!("remove {}", path.display()));
        Ok(())
    }

    fn symlink(&self, to: &Path, path: &Path) -> HostResult<()> {
        let mut machine = self.machine();
        machine.check_writable(path)?;
        machine.check_parent(path)?;
        if machine.entries.contains_key(path) {
            return Err(HostError::Failed(format!("{} already exists", path.display())));
        }
        machine.entries.insert(
            path.to_path_buf(),
            Entry::new(Node::Symlink(to.to_path_buf())),
        );
        machine.record(format!("symlink {} -> {}", path.display(), to.display()));
        Ok(())
    }

    fn set_owner(&self, path: &Path, owner: Option<&str>, group: Option<&str>) -> HostResult<()> {
        let mut machine = self.machine();
        machine.check_writable(path)?;
        let entry = machine
            .entries
            .get_mut(path)
            .ok_or_else(|| HostError::Failed(format!("{} does not exist", path.display())))?;
        if let Some(owner) = owner {
            entry.owner = owner.to_string();
        }
        if let Some(group) = group {
            entry.group = group.to_string();
        }
        machine.record(format!(
            "chown {}:{} {}",
            owner.unwrap_or_default(),
            group.unwrap_or_default(),
            path.display()
        ));
        Ok(())
    }

    fn set_mode(&self, path: &Path, mode: u32) -> HostResult<()> {
        let mut machine = self.machine();
        machine.check_writable(path)?;
        let entry = machine
            .entries
            .get_mut(path)
            .ok_or_else(|| HostError::Failed(format!("{} does not exist", path.display())))?;
        entry.mode = mode;
        machine.record(format!("chmod {mode:o} {}", path.display()));
        Ok(())
    }

    fn service_status(&self, name: &str) -> HostResult<Option<ServiceStatus>> {
        Ok(self.machine().services.get(name).copied())
    }

    fn control_service(&self, name: &str, action: ServiceAction) -> HostResult<()> {
        let mut machine = self.machine();
        let status = machine
            .services
            .get_mut(name)
            .ok_or_else(|| HostError::Unavailable(format!("unknown service {name}")))?;
        match action {
            ServiceAction::Start | ServiceAction::Restart | ServiceAction::Reload => {
                status.running = true;
            }
            ServiceAction::Stop => status.running = false,
            ServiceAction::Enable => status.enabled = true,
            ServiceAction::Disable => status.enabled = false,
        }
        machine
            .service_log
            .entry(name.to_string())
            .or_default()
            .push(action);
        machine.record(format!("service {name} {}", action.as_str()));
        Ok(())
    }

    fn database_exists(&self, conn: &DbConnection, name: &str) -> HostResult<bool> {
        Ok(self.machine().server(conn)?.databases.contains(name))
    }

    fn create_database(&self, conn: &DbConnection, name: &str) -> HostResult<()> {
        let mut machine = self.machine();
        machine.server_mut(conn)?.databases.insert(name.to_string());
        machine.record(format!("create database {name}"));
        Ok(())
    }

    fn drop_database(&self, conn: &DbConnection, name: &str) -> HostResult<()> {
        let mut machine = self.machine();
        let server = machine.server_mut(conn)?;
        server.databases.remove(name);
        server.grants.retain(|(_, db, _)| db != name);
        machine.record(format!("drop database {name}"));
        Ok(())
    }

    fn user_exists(&self, conn: &DbConnection, user: &str) -> HostResult<bool> {
        Ok(self.machine().server(conn)?.users.contains_key(user))
    }

    fn create_user(&self, conn: &DbConnection, user: &str, password: &str) -> HostResult<()> {
        let mut machine = self.machine();
        machine
            .server_mut(conn)?
            .users
            .insert(user.to_string(), password.to_string());
        machine.record(format!("create user {user}"));
        Ok(())
    }

    fn drop_user(&self, conn: &DbConnection, user: &str) -> HostResult<()> {
        let mut machine = self.machine();
        let server = machine.server_mut(conn)?;
        server.users.remove(user);
        server.grants.retain(|(u, _, _)| u != user);
        machine.record(format!("drop user {user}"));
        Ok(())
    }

    fn has_grant(
        &self,
        conn: &DbConnection,
        user: &str,
        database: &str,
        privileges: &[String],
    ) -> HostResult<bool> {
        let machine = self.machine();
        let server = machine.server(conn)?;
        Ok(privileges.iter().all(|p| {
            server
                .grants
                .contains(&(user.to_string(), database.to_string(), p.to_uppercase()))
        }))
    }

    fn grant(
        &self,
        conn: &DbConnection,
        user: &str,
        database: &str,
        privileges: &[String],
    ) -> HostResult<()> {
        let mut machine = self.machine();
        let server = machine.server_mut(conn)?;
        if !server.databases.contains(database) {
            return Err(HostError::Unavailable(format!(
                "database {database} does not exist"
            )));
        }
        if !server.users.contains_key(user) {
            return Err(HostError::Unavailable(format!("user {user} does not exist")));
        }
        for privilege in privileges {
            server.grants.insert((
                user.to_string(),
                database.to_string(),
                privilege.to_uppercase(),
            ));
        }
        machine.record(format!(
            "grant {} on {database} to {user}",
            privileges.join(", ")
        ));
        Ok(())
    }

    fn command_exists(&self, program: &str) -> bool {
        self.machine().binaries.contains(program)
    }

    fn run_command(&self, command: &ExecuteParams) -> HostResult<CommandOutput> {
        let mut machine = self.machine();
        machine.commands.push(command.command.clone());
        let success = machine
            .command_results
            .get(&command.command)
            .copied()
            .unwrap_or(true);
        if success && let Some(effect) = self.effects.get(&command.command) {
            effect(&mut machine);
            machine.record(format!("exec {}", command.command));
        }
        Ok(CommandOutput {
            stdout: Vec::new(),
            stderr: if success {
                Vec::new()
            } else {
                format!("{}: exited with status 1", command.command).into_bytes()
            },
            success,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_create_parents() {
        let host = MemoryHost::new().with_file("/etc/nginx/nginx.conf", "events {}");
        let stat = host.stat(Path::new("/etc/nginx")).unwrap().unwrap();
        assert_eq!(stat.kind, FileKind::Directory);
        assert_eq!(
            host.file_content("/etc/nginx/nginx.conf").as_deref(),
            Some("events {}")
        );
        assert!(host.journal().is_empty());
    }

    #[test]
    fn test_root_always_exists() {
        let host = MemoryHost::new();
        let stat = host.stat(Path::new("/")).unwrap().unwrap();
        assert_eq!(stat.kind, FileKind::Directory);
        host.write_file(Path::new("/hello"), b"hi").unwrap();
        assert_eq!(host.journal().len(), 1);
    }

    #[test]
    fn test_remove_takes_subtree() {
        let host = MemoryHost::new()
            .with_file("/srv/app/a", "1")
            .with_file("/srv/app/b/c", "2");
        host.remove(Path::new("/srv/app")).unwrap();
        assert!(host.stat(Path::new("/srv/app/b/c")).unwrap().is_none());
        assert!(host.stat(Path::new("/srv")).unwrap().is_some());
    }

    #[test]
    fn test_install_registers_services() {
        let host = MemoryHost::new()
            .with_available_package("mysql-server", "8.0")
            .with_package_service("mysql-server", "mysql");
        assert_eq!(host.service_status("mysql").unwrap(), None);
        host.install_package("mysql-server", None, PackageProvider::System)
            .unwrap();
        assert_eq!(
            host.service_status("mysql").unwrap(),
            Some(ServiceStatus {
                running: false,
                enabled: false
            })
        );
    }

    #[test]
    fn test_grant_is_case_insensitive() {
        let host = MemoryHost::new().with_database_server("localhost:3306");
        let conn = DbConnection::default();
        host.create_database(&conn, "shop").unwrap();
        host.create_user(&conn, "app", "pw").unwrap();
        host.grant(&conn, "app", "shop", &["select".to_string()])
            .unwrap();
        assert!(host
            .has_grant(&conn, "app", "shop", &["SELECT".to_string()])
            .unwrap());
    }
}
