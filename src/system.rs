//! Host implementation for the local Debian-family machine
//!
//! Packages go through `dpkg-query`/`apt-get` (or `pip`), services through
//! `systemctl`, databases through the `mysql` client and files through
//! `std::fs`. Owners resolve through NSS (`nix::unistd`), so directory
//! service accounts work the same as local ones.

use declarative::host::{
    CommandOutput, FileKind, FileStat, Host, HostError, HostResult, ServiceAction, ServiceStatus,
};
use declarative::resource::{DbConnection, ExecuteParams, PackageProvider, RepositorySource};
use nix::unistd::{Gid, Group, Uid, User, chown};
use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::runner;

const SOURCES_DIR: &str = "/etc/apt/sources.list.d";
const KEY_MARKER: &str = "# cozinha-key:";

/// The machine cozinha is running on
#[derive(Debug, Clone)]
pub struct SystemHost {
    sources_dir: PathBuf,
}

impl Default for SystemHost {
    fn default() -> Self {
        Self {
            sources_dir: PathBuf::from(SOURCES_DIR),
        }
    }
}

impl SystemHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn source_file(&self, name: &str) -> PathBuf {
        self.sources_dir.join(format!("{name}.list"))
    }

    fn mysql(&self, conn: &DbConnection, sql: &str) -> HostResult<String> {
        let port = conn.port.unwrap_or(3306).to_string();
        let args = [
            "-h",
            conn.host.as_str(),
            "-P",
            port.as_str(),
            "-u",
            conn.username.as_str(),
            "-N",
            "-B",
            "-e",
            sql,
        ];
        let envs: Vec<(&str, &str)> = conn
            .password
            .as_deref()
            .map(|pw| vec![("MYSQL_PWD", pw)])
            .unwrap_or_default();
        let output = runner::run_capture_env("mysql", &args, &envs)?;
        if output.success {
            Ok(output.stdout_str())
        } else {
            Err(runner::classify_failure("mysql", &output.stderr_str()))
        }
    }
}

fn io_error(path: &Path, e: &io::Error) -> HostError {
    let message = format!("{}: {e}", path.display());
    match e.kind() {
        io::ErrorKind::PermissionDenied => HostError::PermissionDenied(message),
        io::ErrorKind::NotFound => HostError::Unavailable(message),
        _ => HostError::Failed(message),
    }
}

/// User name for `uid`, or the numeric id when no account resolves
fn user_name(uid: u32) -> String {
    User::from_uid(Uid::from_raw(uid))
        .ok()
        .flatten()
        .map_or_else(|| uid.to_string(), |user| user.name)
}

/// Group name for `gid`, or the numeric id when no group resolves
fn group_name(gid: u32) -> String {
    Group::from_gid(Gid::from_raw(gid))
        .ok()
        .flatten()
        .map_or_else(|| gid.to_string(), |group| group.name)
}

/// Resolve an owner given by name or numeric id
fn resolve_user(name: &str) -> HostResult<Uid> {
    if let Ok(id) = name.parse::<u32>() {
        return Ok(Uid::from_raw(id));
    }
    User::from_name(name)
        .map_err(|e| HostError::Failed(format!("looking up user {name}: {e}")))?
        .map(|user| user.uid)
        .ok_or_else(|| HostError::Unavailable(format!("no such user: {name}")))
}

fn resolve_group(name: &str) -> HostResult<Gid> {
    if let Ok(id) = name.parse::<u32>() {
        return Ok(Gid::from_raw(id));
    }
    Group::from_name(name)
        .map_err(|e| HostError::Failed(format!("looking up group {name}: {e}")))?
        .map(|group| group.gid)
        .ok_or_else(|| HostError::Unavailable(format!("no such group: {name}")))
}

/// Parse `dpkg-query -f '${Status} ${Version}'` output
fn parse_dpkg_status(output: &str) -> Option<String> {
    let rest = output.trim().strip_prefix("install ok installed")?;
    let version = rest.trim();
    (!version.is_empty()).then(|| version.to_string())
}

/// Parse the `Version:` line of `pip show`
fn parse_pip_show(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("Version:"))
        .map(|v| v.trim().to_string())
}

/// Render a sources.list.d entry; the signing key rides along as a comment
fn render_source(source: &RepositorySource) -> String {
    let mut text = String::new();
    if let (Some(keyserver), Some(key)) = (&source.keyserver, &source.key) {
        text.push_str(&format!("{KEY_MARKER} {keyserver} {key}\n"));
    }
    text.push_str(&source.line());
    text.push('\n');
    text
}

fn parse_source(text: &str) -> Option<RepositorySource> {
    let mut keyserver = None;
    let mut key = None;
    let mut entry = None;
    for line in text.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix(KEY_MARKER) {
            let mut parts = rest.split_whitespace();
            keyserver = parts.next().map(str::to_string);
            key = parts.next().map(str::to_string);
        } else if let Some(rest) = line.strip_prefix("deb ") {
            entry = Some(rest.to_string());
        }
    }
    let entry = entry?;
    let mut parts = entry.split_whitespace().filter(|p| !p.starts_with('['));
    let uri = parts.next()?.to_string();
    let distribution = parts.next()?.to_string();
    Some(RepositorySource {
        uri,
        distribution,
        components: parts.map(str::to_string).collect(),
        keyserver,
        key,
    })
}

fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn sql_ident(value: &str) -> String {
    format!("`{}`", value.replace('`', "``"))
}

/// Whether `SHOW GRANTS` output covers `privileges` on `database`
fn grants_cover(grants: &str, database: &str, privileges: &[String]) -> bool {
    let on_db = format!("ON {}.*", sql_ident(database));
    let lines: Vec<String> = grants
        .lines()
        .filter(|l| l.contains(&on_db) || l.contains("ON *.*"))
        .map(str::to_uppercase)
        .collect();
    privileges.iter().all(|privilege| {
        let wanted = match privilege.to_uppercase().as_str() {
            "ALL" => "ALL PRIVILEGES".to_string(),
            other => other.to_string(),
        };
        lines
            .iter()
            .any(|l| l.contains(&wanted) || l.contains("ALL PRIVILEGES"))
    })
}

impl Host for SystemHost {
    fn package_version(
        &self,
        name: &str,
        provider: PackageProvider,
    ) -> HostResult<Option<String>> {
        match provider {
            PackageProvider::System => {
                let output =
                    runner::run_capture("dpkg-query", &["-W", "-f=${Status} ${Version}", name])?;
                Ok(output
                    .success
                    .then(|| parse_dpkg_status(&output.stdout_str()))
                    .flatten())
            }
            PackageProvider::Pip => {
                let output = runner::run_capture("pip", &["show", name])?;
                Ok(output
                    .success
                    .then(|| parse_pip_show(&output.stdout_str()))
                    .flatten())
            }
        }
    }

    fn install_package(
        &self,
        name: &str,
        version: Option<&str>,
        provider: PackageProvider,
    ) -> HostResult<()> {
        match provider {
            PackageProvider::System => {
                let spec = version.map_or(name.to_string(), |v| format!("{name}={v}"));
                let output = runner::run_capture_env(
                    "apt-get",
                    &["install", "-y", "-q", spec.as_str()],
                    &[("DEBIAN_FRONTEND", "noninteractive")],
                )?;
                if !output.success {
                    return Err(runner::classify_failure("apt-get", &output.stderr_str()));
                }
            }
            PackageProvider::Pip => {
                let spec = version.map_or(name.to_string(), |v| format!("{name}=={v}"));
                runner::run_checked("pip", &["install", spec.as_str()])?;
            }
        }
        Ok(())
    }

    fn remove_package(&self, name: &str, provider: PackageProvider) -> HostResult<()> {
        match provider {
            PackageProvider::System => {
                let output = runner::run_capture_env(
                    "apt-get",
                    &["remove", "-y", "-q", name],
                    &[("DEBIAN_FRONTEND", "noninteractive")],
                )?;
                if !output.success {
                    return Err(runner::classify_failure("apt-get", &output.stderr_str()));
                }
            }
            PackageProvider::Pip => {
                runner::run_checked("pip", &["uninstall", "-y", name])?;
            }
        }
        Ok(())
    }

    fn repository(&self, name: &str) -> HostResult<Option<RepositorySource>> {
        let path = self.source_file(name);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(parse_source(&text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, &e)),
        }
    }

    fn add_repository(&self, name: &str, source: &RepositorySource) -> HostResult<()> {
        if let (Some(keyserver), Some(key)) = (&source.keyserver, &source.key) {
            runner::run_checked(
                "apt-key",
                &[
                    "adv",
                    "--keyserver",
                    keyserver.as_str(),
                    "--recv-keys",
                    key.as_str(),
                ],
            )?;
        }
        let path = self.source_file(name);
        fs::write(&path, render_source(source)).map_err(|e| io_error(&path, &e))?;
        runner::run_checked("apt-get", &["update", "-q"])?;
        Ok(())
    }

    fn remove_repository(&self, name: &str) -> HostResult<()> {
        let path = self.source_file(name);
        fs::remove_file(&path).map_err(|e| io_error(&path, &e))?;
        runner::run_checked("apt-get", &["update", "-q"])?;
        Ok(())
    }

    fn stat(&self, path: &Path) -> HostResult<Option<FileStat>> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(path, &e)),
        };
        let kind = if meta.file_type().is_symlink() {
            FileKind::Symlink {
                target: fs::read_link(path).map_err(|e| io_error(path, &e))?,
            }
        } else if meta.is_dir() {
            FileKind::Directory
        } else {
            FileKind::File
        };
        Ok(Some(FileStat {
            kind,
            owner: user_name(meta.uid()),
            group: group_name(meta.gid()),
            mode: meta.mode() & 0o7777,
        }))
    }

    fn read_file(&self, path: &Path) -> HostResult<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(path, &e)),
        }
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> HostResult<()> {
        fs::write(path, content).map_err(|e| io_error(path, &e))
    }

    fn create_dir(&self, path: &Path, recursive: bool) -> HostResult<()> {
        let result = if recursive {
            fs::create_dir_all(path)
        } else {
            fs::create_dir(path)
        };
        result.map_err(|e| io_error(path, &e))
    }

    fn remove(&self, path: &Path) -> HostResult<()> {
        let meta = fs::symlink_metadata(path).map_err(|e| io_error(path, &e))?;
        let result = if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        result.map_err(|e| io_error(path, &e))
    }

    fn symlink(&self, to: &Path, path: &Path) -> HostResult<()> {
        std::os::unix::fs::symlink(to, path).map_err(|e| io_error(path, &e))
    }

    fn set_owner(&self, path: &Path, owner: Option<&str>, group: Option<&str>) -> HostResult<()> {
        if owner.is_none() && group.is_none() {
            return Ok(());
        }
        let uid = owner.map(resolve_user).transpose()?;
        let gid = group.map(resolve_group).transpose()?;
        chown(path, uid, gid).map_err(|e| io_error(path, &io::Error::from(e)))
    }

    fn set_mode(&self, path: &Path, mode: u32) -> HostResult<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| io_error(path, &e))
    }

    fn service_status(&self, name: &str) -> HostResult<Option<ServiceStatus>> {
        let load = runner::run_capture(
            "systemctl",
            &["show", "--property=LoadState", "--value", name],
        )?;
        if !load.success || load.stdout_str().trim() == "not-found" {
            return Ok(None);
        }
        let active = runner::run_capture("systemctl", &["is-active", "--quiet", name])?;
        let enabled = runner::run_capture("systemctl", &["is-enabled", "--quiet", name])?;
        Ok(Some(ServiceStatus {
            running: active.success,
            enabled: enabled.success,
        }))
    }

    fn control_service(&self, name: &str, action: ServiceAction) -> HostResult<()> {
        runner::run_checked("systemctl", &[action.as_str(), name])?;
        Ok(())
    }

    fn database_exists(&self, conn: &DbConnection, name: &str) -> HostResult<bool> {
        let sql = format!(
            "SELECT SCHEMA_NAME FROM INFORMATION_SCHEMA.SCHEMATA WHERE SCHEMA_NAME = {}",
            sql_string(name)
        );
        Ok(!self.mysql(conn, &sql)?.trim().is_empty())
    }

    fn create_database(&self, conn: &DbConnection, name: &str) -> HostResult<()> {
        self.mysql(conn, &format!("CREATE DATABASE {}", sql_ident(name)))
            .map(drop)
    }

    fn drop_database(&self, conn: &DbConnection, name: &str) -> HostResult<()> {
        self.mysql(conn, &format!("DROP DATABASE {}", sql_ident(name)))
            .map(drop)
    }

    fn user_exists(&self, conn: &DbConnection, user: &str) -> HostResult<bool> {
        let sql = format!(
            "SELECT User FROM mysql.user WHERE User = {}",
            sql_string(user)
        );
        Ok(!self.mysql(conn, &sql)?.trim().is_empty())
    }

    fn create_user(&self, conn: &DbConnection, user: &str, password: &str) -> HostResult<()> {
        let sql = format!(
            "CREATE USER {}@'%' IDENTIFIED BY {}",
            sql_string(user),
            sql_string(password)
        );
        self.mysql(conn, &sql).map(drop)
    }

    fn drop_user(&self, conn: &DbConnection, user: &str) -> HostResult<()> {
        self.mysql(conn, &format!("DROP USER {}@'%'", sql_string(user)))
            .map(drop)
    }

    fn has_grant(
        &self,
        conn: &DbConnection,
        user: &str,
        database: &str,
        privileges: &[String],
    ) -> HostResult<bool> {
        if !self.user_exists(conn, user)? {
            return Ok(false);
        }
        let grants = self.mysql(conn, &format!("SHOW GRANTS FOR {}@'%'", sql_string(user)))?;
        Ok(grants_cover(&grants, database, privileges))
    }

    fn grant(
        &self,
        conn: &DbConnection,
        user: &str,
        database: &str,
        privileges: &[String],
    ) -> HostResult<()> {
        let sql = format!(
            "GRANT {} ON {}.* TO {}@'%'",
            privileges.join(", "),
            sql_ident(database),
            sql_string(user)
        );
        self.mysql(conn, &sql).map(drop)
    }

    fn command_exists(&self, program: &str) -> bool {
        runner::command_exists(program)
    }

    fn run_command(&self, params: &ExecuteParams) -> HostResult<CommandOutput> {
        let mut command = Command::new("sh");
        command.args(["-c", params.command.as_str()]);
        if let Some(cwd) = &params.cwd {
            command.current_dir(cwd);
        }
        command.envs(&params.environment);
        runner::run_command(&mut command, "sh", &["-c", params.command.as_str()])
    }
}
