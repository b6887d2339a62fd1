//! Resource model
//!
//! A resource is one declarative unit of desired machine state. Each kind
//! carries its own parameter struct; [`ResourceSpec`] is the tagged variant
//! over all kinds and dispatches to the kind through the [`Converge`] trait.
//!
//! In recipe files a resource is a TOML table tagged by `type`:
//!
//! ```toml
//! [[resource]]
//! type = "template"
//! path = "${nginx.dir}/sites-enabled/app.conf"
//! source = "app.conf.j2"
//! mode = "0644"
//! notifies = [{ action = "reload", target = "service[nginx]" }]
//! ```

pub use crate::context::ApplyContext;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::types::{ApplyResult, ResourceState};
use serde::{Deserialize, Deserializer, Serialize, de};
use std::fmt;
use std::str::FromStr;

pub mod database;
pub mod directory;
pub mod execute;
pub mod file;
pub mod link;
pub mod package;
pub mod repository;
pub mod service;
pub mod template;

pub use database::{DatabaseParams, DatabaseUserParams, DbConnection, UserAction};
pub use directory::DirectoryParams;
pub use execute::{ExecuteAction, ExecuteParams};
pub use file::FileParams;
pub use link::LinkParams;
pub use package::{PackageParams, PackageProvider, PackageState};
pub use repository::{RepositoryParams, RepositorySource};
pub use service::{ServiceParams, ServiceState};
pub use template::TemplateParams;

/// Resource kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Package,
    PackageRepository,
    Directory,
    File,
    Template,
    Link,
    Service,
    Database,
    DatabaseUser,
    Execute,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 10] = [
        Self::Package,
        Self::PackageRepository,
        Self::Directory,
        Self::File,
        Self::Template,
        Self::Link,
        Self::Service,
        Self::Database,
        Self::DatabaseUser,
        Self::Execute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "package",
            Self::PackageRepository => "package_repository",
            Self::Directory => "directory",
            Self::File => "file",
            Self::Template => "template",
            Self::Link => "link",
            Self::Service => "service",
            Self::Database => "database",
            Self::DatabaseUser => "database_user",
            Self::Execute => "execute",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind '{s}'"))
    }
}

/// `kind[name]` reference identifying a resource within a run
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.name)
    }
}

impl FromStr for ResourceRef {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, rest) = s
            .split_once('[')
            .ok_or_else(|| format!("expected kind[name], got '{s}'"))?;
        let name = rest
            .strip_suffix(']')
            .ok_or_else(|| format!("expected kind[name], got '{s}'"))?;
        if name.is_empty() {
            return Err(format!("empty resource name in '{s}'"));
        }
        Ok(Self::new(kind.trim().parse()?, name))
    }
}

impl TryFrom<String> for ResourceRef {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceRef> for String {
    fn from(value: ResourceRef) -> Self {
        value.to_string()
    }
}

/// What a notification asks its target to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyAction {
    /// Converge the target again
    Apply,
    Reload,
    Restart,
    Start,
    Stop,
    /// Run an `execute` resource regardless of its guards
    Run,
}

impl fmt::Display for NotifyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Apply => "apply",
            Self::Reload => "reload",
            Self::Restart => "restart",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Run => "run",
        };
        f.write_str(s)
    }
}

/// Edge from a resource to another one, fired when the source changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Notification {
    pub action: NotifyAction,
    pub target: ResourceRef,
}

/// Behaviour every resource kind provides
///
/// `apply` must be idempotent: when the host already matches the desired
/// state it returns [`ApplyResult::NoChange`] without mutating anything.
pub trait Converge: fmt::Debug {
    fn kind(&self) -> ResourceKind;

    /// Identifier of the resource within its kind (package name, path, ...)
    fn name(&self) -> String;

    fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.kind(), self.name())
    }

    /// Human-readable description of what this resource does
    fn description(&self) -> String;

    /// Parameter checks that don't need the host
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Observe the resource on the host
    fn current_state(&self, host: &dyn Host) -> Result<ResourceState>;

    fn desired_state(&self) -> ResourceState;

    fn needs_apply(&self, host: &dyn Host) -> Result<bool> {
        Ok(self.current_state(host)? != self.desired_state())
    }

    /// Converge the host to the desired state
    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<ApplyResult>;

    /// Whether a notification with this action can target the resource
    fn supports(&self, action: NotifyAction) -> bool {
        action == NotifyAction::Apply
    }

    /// Handle a notification
    fn react(&self, action: NotifyAction, ctx: &ApplyContext<'_>) -> Result<ApplyResult> {
        match action {
            NotifyAction::Apply => self.apply(ctx),
            other => Err(Error::Host {
                resource: self.reference().to_string(),
                reason: format!("{} resources cannot {}", self.kind(), other),
            }),
        }
    }
}

/// Tagged variant over every resource kind
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceSpec {
    Package(PackageParams),
    PackageRepository(RepositoryParams),
    Directory(DirectoryParams),
    File(FileParams),
    Template(TemplateParams),
    Link(LinkParams),
    Service(ServiceParams),
    Database(DatabaseParams),
    DatabaseUser(DatabaseUserParams),
    Execute(ExecuteParams),
}

impl ResourceSpec {
    /// The single dispatch point from the variant to its behaviour
    pub fn as_converge(&self) -> &dyn Converge {
        match self {
            Self::Package(p) => p,
            Self::PackageRepository(p) => p,
            Self::Directory(p) => p,
            Self::File(p) => p,
            Self::Template(p) => p,
            Self::Link(p) => p,
            Self::Service(p) => p,
            Self::Database(p) => p,
            Self::DatabaseUser(p) => p,
            Self::Execute(p) => p,
        }
    }
}

macro_rules! spec_from {
    ($($variant:ident => $params:ty),* $(,)?) => {
        $(
            impl From<$params> for ResourceSpec {
                fn from(params: $params) -> Self {
                    Self::$variant(params)
                }
            }
        )*
    };
}

spec_from! {
    Package => PackageParams,
    PackageRepository => RepositoryParams,
    Directory => DirectoryParams,
    File => FileParams,
    Template => TemplateParams,
    Link => LinkParams,
    Service => ServiceParams,
    Database => DatabaseParams,
    DatabaseUser => DatabaseUserParams,
    Execute => ExecuteParams,
}

/// A resource together with its outgoing notifications
#[derive(Debug, Clone)]
pub struct Resource {
    pub spec: ResourceSpec,
    pub notifies: Vec<Notification>,
}

// `notifies` is split off by hand so each kind's parameters can reject
// unknown keys; `#[serde(flatten)]` would swallow them.
impl<'de> Deserialize<'de> for Resource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut table = toml::Table::deserialize(deserializer)?;
        let notifies = match table.remove("notifies") {
            Some(value) => value
                .try_into()
                .map_err(|e: toml::de::Error| de::Error::custom(e.message()))?,
            None => Vec::new(),
        };
        let spec = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| de::Error::custom(e.message()))?;
        Ok(Self { spec, notifies })
    }
}

impl Resource {
    pub fn new(spec: impl Into<ResourceSpec>) -> Self {
        Self {
            spec: spec.into(),
            notifies: Vec::new(),
        }
    }

    /// Add a notification edge to `target`
    pub fn notify(mut self, action: NotifyAction, target: ResourceRef) -> Self {
        self.notifies.push(Notification { action, target });
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.as_converge().kind()
    }

    pub fn reference(&self) -> ResourceRef {
        self.spec.as_converge().reference()
    }

    pub fn description(&self) -> String {
        self.spec.as_converge().description()
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        self.spec.as_converge().validate()
    }

    pub fn current_state(&self, host: &dyn Host) -> Result<ResourceState> {
        self.spec.as_converge().current_state(host)
    }

    pub fn desired_state(&self) -> ResourceState {
        self.spec.as_converge().desired_state()
    }

    pub fn needs_apply(&self, host: &dyn Host) -> Result<bool> {
        self.spec.as_converge().needs_apply(host)
    }

    pub fn apply(&self, ctx: &ApplyContext<'_>) -> Result<ApplyResult> {
        self.spec.as_converge().apply(ctx)
    }

    pub fn supports(&self, action: NotifyAction) -> bool {
        self.spec.as_converge().supports(action)
    }

    pub fn react(&self, action: NotifyAction, ctx: &ApplyContext<'_>) -> Result<ApplyResult> {
        self.spec.as_converge().react(action, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_ref_roundtrip_display() {
        let r: ResourceRef = "template[/etc/nginx/sites-enabled/app.conf]".parse().unwrap();
        assert_eq!(r.kind, ResourceKind::Template);
        assert_eq!(r.name, "/etc/nginx/sites-enabled/app.conf");
        assert_eq!(r.to_string(), "template[/etc/nginx/sites-enabled/app.conf]");
    }

    #[test]
    fn test_resource_ref_rejects_garbage() {
        assert!("nginx".parse::<ResourceRef>().is_err());
        assert!("service[]".parse::<ResourceRef>().is_err());
        assert!("widget[x]".parse::<ResourceRef>().is_err());
    }

    #[test]
    fn test_resource_from_toml_table() {
        let resource: Resource = toml::from_str(
            r#"
            type = "service"
            name = "nginx"
            state = "running"
            notifies = [{ action = "restart", target = "service[uwsgi]" }]
            "#,
        )
        .unwrap();
        assert_eq!(resource.kind(), ResourceKind::Service);
        assert_eq!(resource.reference().to_string(), "service[nginx]");
        assert_eq!(resource.notifies.len(), 1);
        assert_eq!(resource.notifies[0].action, NotifyAction::Restart);
    }

    #[test]
    fn test_misspelled_keys_are_rejected() {
        let err = toml::from_str::<Resource>(
            r#"
            type = "file"
            path = "/etc/x"
            mdoe = "0600"
            "#,
        )
        .unwrap_err();
        assert!(err.message().contains("mdoe"), "{err}");

        let err = toml::from_str::<Resource>(
            r#"
            type = "file"
            path = "/etc/x"
            notify = [{ action = "reload", target = "service[nginx]" }]
            "#,
        )
        .unwrap_err();
        assert!(err.message().contains("notify"), "{err}");
    }

    #[test]
    fn test_notification_with_extra_key_is_rejected() {
        let parsed = toml::from_str::<Resource>(
            r#"
            type = "file"
            path = "/etc/x"
            notifies = [{ action = "reload", target = "service[nginx]", delay = 5 }]
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let parsed = toml::from_str::<Resource>(
            r#"
            type = "cron"
            name = "nightly"
            "#,
        );
        assert!(parsed.is_err());
    }
}
