//! External command resource
//!
//! Commands are not declarative, so idempotence comes from guards: a
//! `creates` path that already exists or an `unless` command that succeeds
//! means the command has already done its work.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{ApplyContext, Converge, NotifyAction, ResourceKind};
use crate::error::{Error, Result};
use crate::host::{Host, HostError};
use crate::types::{ApplyResult, ResourceState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteAction {
    /// Run during convergence unless a guard says it already ran
    #[default]
    Run,
    /// Only run when notified
    Nothing,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecuteParams {
    pub command: String,
    /// Reference name; defaults to the command itself
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Skip when this path exists
    #[serde(default)]
    pub creates: Option<PathBuf>,
    /// Skip when this command succeeds
    #[serde(default)]
    pub unless: Option<String>,
    /// Programs that must be on the search path
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub action: ExecuteAction,
}

impl ExecuteParams {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn creates(mut self, path: impl Into<PathBuf>) -> Self {
        self.creates = Some(path.into());
        self
    }

    pub fn unless(mut self, command: impl Into<String>) -> Self {
        self.unless = Some(command.into());
        self
    }

    pub fn requires(mut self, program: impl Into<String>) -> Self {
        self.requires.push(program.into());
        self
    }

    pub fn on_notification(mut self) -> Self {
        self.action = ExecuteAction::Nothing;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Whether the command can ever be skipped during convergence
    pub fn is_guarded(&self) -> bool {
        self.creates.is_some() || self.unless.is_some() || self.action == ExecuteAction::Nothing
    }

    /// Check whether a guard reports the work as done
    fn already_done(&self, host: &dyn Host) -> Result<Option<String>> {
        let reference = self.reference();
        if let Some(path) = &self.creates
            && host.stat(path).map_err(|e| e.at(&reference))?.is_some()
        {
            return Ok(Some(format!("{} exists", path.display())));
        }
        if let Some(unless) = &self.unless {
            let guard = ExecuteParams {
                command: unless.clone(),
                cwd: self.cwd.clone(),
                environment: self.environment.clone(),
                ..ExecuteParams::default()
            };
            let output = host.run_command(&guard).map_err(|e| e.at(&reference))?;
            if output.success {
                return Ok(Some(format!("`{unless}` succeeded")));
            }
        }
        Ok(None)
    }

    fn check_requires(&self, host: &dyn Host) -> Result<()> {
        match self.requires.iter().find(|p| !host.command_exists(p)) {
            Some(missing) => Err(HostError::Unavailable(format!(
                "required program '{missing}' not found"
            ))
            .at(self.reference())),
            None => Ok(()),
        }
    }

    fn run(&self, host: &dyn Host) -> Result<ApplyResult> {
        self.check_requires(host)?;
        log::info!("Running {}", self.command);
        let output = host
            .run_command(self)
            .map_err(|e| e.at(self.reference()))?;
        if output.success {
            log::debug!("{}", output.stdout_str().trim_end());
            Ok(ApplyResult::Modified)
        } else {
            // A failed step leaves whatever depends on it unsatisfiable
            Err(Error::PreconditionFailed {
                resource: self.reference().to_string(),
                reason: format!("command failed: {}", output.stderr_str().trim_end()),
            })
        }
    }
}

impl Converge for ExecuteParams {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Execute
    }

    fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.command.clone())
    }

    fn description(&self) -> String {
        match self.action {
            ExecuteAction::Run => format!("Run `{}`", self.command),
            ExecuteAction::Nothing => format!("Run `{}` when notified", self.command),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.command.trim().is_empty() {
            return Err("command must not be empty".to_string());
        }
        Ok(())
    }

    fn current_state(&self, host: &dyn Host) -> Result<ResourceState> {
        if self.action == ExecuteAction::Nothing {
            return Ok(self.desired_state());
        }
        Ok(match self.already_done(host)? {
            Some(_) => self.desired_state(),
            None => ResourceState::Absent,
        })
    }

    fn desired_state(&self) -> ResourceState {
        match self.action {
            ExecuteAction::Run => ResourceState::present("done"),
            ExecuteAction::Nothing => ResourceState::present("on notification"),
        }
    }

    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<ApplyResult> {
        if self.action == ExecuteAction::Nothing {
            return Ok(ApplyResult::NoChange);
        }
        if let Some(reason) = self.already_done(ctx.host)? {
            log::debug!("Skipping `{}`: {}", self.command, reason);
            return Ok(ApplyResult::NoChange);
        }
        self.run(ctx.host)
    }

    fn supports(&self, action: NotifyAction) -> bool {
        matches!(action, NotifyAction::Run | NotifyAction::Apply)
    }

    fn react(&self, action: NotifyAction, ctx: &ApplyContext<'_>) -> Result<ApplyResult> {
        match action {
            NotifyAction::Run => self.run(ctx.host),
            NotifyAction::Apply => self.apply(ctx),
            other => Err(Error::Host {
                resource: self.reference().to_string(),
                reason: format!("commands cannot {other}"),
            }),
        }
    }
}
