//! Database and database user resources (MySQL-compatible servers)

use serde::{Deserialize, Serialize};

use super::{ApplyContext, Converge, ResourceKind};
use crate::error::Result;
use crate::host::{Host, HostError};
use crate::types::{ApplyResult, Ensure, ResourceState};

/// How to reach the database server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbConnection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_username() -> String {
    "root".to_string()
}

impl Default for DbConnection {
    fn default() -> Self {
        Self {
            host: default_host(),
            username: default_username(),
            password: None,
            port: None,
        }
    }
}

impl DbConnection {
    /// `host:port`, the key a server is known by
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port.unwrap_or(3306))
    }
}

/// A database on a server
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseParams {
    pub name: String,
    #[serde(default)]
    pub connection: DbConnection,
    #[serde(default)]
    pub state: Ensure,
}

impl DatabaseParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: DbConnection::default(),
            state: Ensure::Present,
        }
    }

    pub fn connection(mut self, connection: DbConnection) -> Self {
        self.connection = connection;
        self
    }
}

impl Converge for DatabaseParams {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Database
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        match self.state {
            Ensure::Present => format!(
                "Create database {} on {}",
                self.name,
                self.connection.endpoint()
            ),
            Ensure::Absent => format!(
                "Drop database {} on {}",
                self.name,
                self.connection.endpoint()
            ),
        }
    }

    fn current_state(&self, host: &dyn Host) -> Result<ResourceState> {
        let exists = host
            .database_exists(&self.connection, &self.name)
            .map_err(|e| e.at(self.reference()))?;
        Ok(if exists {
            ResourceState::present("database")
        } else {
            ResourceState::Absent
        })
    }

    fn desired_state(&self) -> ResourceState {
        match self.state {
            Ensure::Present => ResourceState::present("database"),
            Ensure::Absent => ResourceState::Absent,
        }
    }

    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<ApplyResult> {
        let reference = self.reference();
        let exists = ctx
            .host
            .database_exists(&self.connection, &self.name)
            .map_err(|e| e.at(&reference))?;

        match (self.state, exists) {
            (Ensure::Present, false) => {
                log::info!("Creating database {}", self.name);
                ctx.host
                    .create_database(&self.connection, &self.name)
                    .map_err(|e| e.at(&reference))?;
                Ok(ApplyResult::Created)
            }
            (Ensure::Absent, true) => {
                log::info!("Dropping database {}", self.name);
                ctx.host
                    .drop_database(&self.connection, &self.name)
                    .map_err(|e| e.at(&reference))?;
                Ok(ApplyResult::Removed)
            }
            _ => Ok(ApplyResult::NoChange),
        }
    }
}

/// What to do with a database account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    #[default]
    Create,
    /// Grant privileges on `database`; account and database must exist
    Grant,
    Drop,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseUserParams {
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub connection: DbConnection,
    #[serde(default)]
    pub action: UserAction,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_privileges")]
    pub privileges: Vec<String>,
}

fn default_privileges() -> Vec<String> {
    vec!["ALL".to_string()]
}

impl DatabaseUserParams {
    pub fn create(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: Some(password.into()),
            connection: DbConnection::default(),
            action: UserAction::Create,
            database: None,
            privileges: default_privileges(),
        }
    }

    pub fn grant(name: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: None,
            connection: DbConnection::default(),
            action: UserAction::Grant,
            database: Some(database.into()),
            privileges: default_privileges(),
        }
    }

    pub fn drop(name: impl Into<String>) -> Self {
        Self {
            password: None,
            action: UserAction::Drop,
            ..Self::grant(name, "")
        }
    }

    pub fn privileges<I, S>(mut self, privileges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.privileges = privileges.into_iter().map(Into::into).collect();
        self
    }

    fn database(&self) -> &str {
        self.database.as_deref().unwrap_or_default()
    }
}

impl Converge for DatabaseUserParams {
    fn kind(&self) -> ResourceKind {
        ResourceKind::DatabaseUser
    }

    fn name(&self) -> String {
        match self.action {
            UserAction::Grant => format!("{}:{}", self.name, self.database()),
            UserAction::Create | UserAction::Drop => self.name.clone(),
        }
    }

    fn description(&self) -> String {
        match self.action {
            UserAction::Create => format!("Create database user {}", self.name),
            UserAction::Grant => format!(
                "Grant {} on {} to {}",
                self.privileges.join(", "),
                self.database(),
                self.name
            ),
            UserAction::Drop => format!("Drop database user {}", self.name),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self.action {
            UserAction::Create if self.password.is_none() => {
                Err("creating a user requires a password".to_string())
            }
            UserAction::Grant if self.database().is_empty() => {
                Err("grant requires a database".to_string())
            }
            UserAction::Grant if self.privileges.is_empty() => {
                Err("grant requires at least one privilege".to_string())
            }
            _ => Ok(()),
        }
    }

    fn current_state(&self, host: &dyn Host) -> Result<ResourceState> {
        let reference = self.reference();
        let present = match self.action {
            UserAction::Create | UserAction::Drop => host
                .user_exists(&self.connection, &self.name)
                .map_err(|e| e.at(&reference))?,
            UserAction::Grant => host
                .has_grant(
                    &self.connection,
                    &self.name,
                    self.database(),
                    &self.privileges,
                )
                .map_err(|e| e.at(&reference))?,
        };
        Ok(match (present, self.action) {
            (false, _) => ResourceState::Absent,
            (true, UserAction::Grant) => self.desired_state(),
            (true, _) => ResourceState::present("user"),
        })
    }

    fn desired_state(&self) -> ResourceState {
        match self.action {
            UserAction::Create => ResourceState::present("user"),
            UserAction::Grant => ResourceState::present(format!(
                "{} on {}",
                self.privileges.join(", "),
                self.database()
            )),
            UserAction::Drop => ResourceState::Absent,
        }
    }

    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<ApplyResult> {
        let reference = self.reference();
        let host = ctx.host;
        let conn = &self.connection;

        match self.action {
            UserAction::Create => {
                if host.user_exists(conn, &self.name).map_err(|e| e.at(&reference))? {
                    return Ok(ApplyResult::NoChange);
                }
                log::info!("Creating database user {}", self.name);
                host.create_user(conn, &self.name, self.password.as_deref().unwrap_or_default())
                    .map_err(|e| e.at(&reference))?;
                Ok(ApplyResult::Created)
            }
            UserAction::Drop => {
                if !host.user_exists(conn, &self.name).map_err(|e| e.at(&reference))? {
                    return Ok(ApplyResult::NoChange);
                }
                host.drop_user(conn, &self.name)
                    .map_err(|e| e.at(&reference))?;
                Ok(ApplyResult::Removed)
            }
            UserAction::Grant => {
                let database = self.database();
                if !host
                    .database_exists(conn, database)
                    .map_err(|e| e.at(&reference))?
                {
                    return Err(HostError::Unavailable(format!(
                        "database {database} does not exist"
                    ))
                    .at(&reference));
                }
                if !host.user_exists(conn, &self.name).map_err(|e| e.at(&reference))? {
                    return Err(HostError::Unavailable(format!(
                        "user {} does not exist",
                        self.name
                    ))
                    .at(&reference));
                }
                if host
                    .has_grant(conn, &self.name, database, &self.privileges)
                    .map_err(|e| e.at(&reference))?
                {
                    return Ok(ApplyResult::NoChange);
                }
                log::info!(
                    "Granting {} on {database} to {}",
                    self.privileges.join(", "),
                    self.name
                );
                host.grant(conn, &self.name, database, &self.privileges)
                    .map_err(|e| e.at(&reference))?;
                Ok(ApplyResult::Modified)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;

    #[test]
    fn test_create_database_idempotent() {
        let host = MemoryHost::new().with_database_server("localhost:3306");
        let ctx = ApplyContext::new(&host);
        let db = DatabaseParams::new("app_production");
        assert_eq!(db.apply(&ctx).unwrap(), ApplyResult::Created);
        assert_eq!(db.apply(&ctx).unwrap(), ApplyResult::NoChange);
        assert_eq!(db.current_state(&host).unwrap(), db.desired_state());
    }

    #[test]
    fn test_server_unreachable_is_precondition_failure() {
        let host = MemoryHost::new();
        let ctx = ApplyContext::new(&host);
        let err = DatabaseParams::new("app").apply(&ctx).unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");
    }

    #[test]
    fn test_grant_requires_database_and_user() {
        let host = MemoryHost::new().with_database_server("localhost:3306");
        let ctx = ApplyContext::new(&host);
        let grant = DatabaseUserParams::grant("app", "app_production");
        assert_eq!(grant.apply(&ctx).unwrap_err().kind(), "precondition_failed");

        DatabaseParams::new("app_production").apply(&ctx).unwrap();
        assert_eq!(grant.apply(&ctx).unwrap_err().kind(), "precondition_failed");

        DatabaseUserParams::create("app", "s3cret")
            .apply(&ctx)
            .unwrap();
        assert_eq!(grant.apply(&ctx).unwrap(), ApplyResult::Modified);
        assert_eq!(grant.apply(&ctx).unwrap(), ApplyResult::NoChange);
    }

    #[test]
    fn test_grant_reference_includes_database() {
        let grant = DatabaseUserParams::grant("app", "app_production");
        assert_eq!(
            grant.reference().to_string(),
            "database_user[app:app_production]"
        );
        let create = DatabaseUserParams::create("app", "pw");
        assert_eq!(create.reference().to_string(), "database_user[app]");
    }

    #[test]
    fn test_validation() {
        let mut create = DatabaseUserParams::create("app", "pw");
        create.password = None;
        assert!(create.validate().is_err());
        assert!(DatabaseUserParams::grant("app", "").validate().is_err());
        assert!(DatabaseUserParams::drop("app").validate().is_ok());
    }
}
