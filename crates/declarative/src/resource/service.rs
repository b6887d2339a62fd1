//! Service resource
//!
//! Besides converging run/boot state, services are the usual target of
//! notifications: a changed config file asks its service to reload.

use serde::{Deserialize, Serialize};

use super::{ApplyContext, Converge, NotifyAction, ResourceKind};
use crate::error::{Error, Result};
use crate::host::{Host, HostError, ServiceAction, ServiceStatus};
use crate::types::{ApplyResult, ResourceState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    #[default]
    Running,
    Stopped,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceParams {
    pub name: String,
    #[serde(default)]
    pub state: ServiceState,
    /// Start at boot; left alone when unset
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl ServiceParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ServiceState::Running,
            enabled: None,
        }
    }

    pub fn stopped(mut self) -> Self {
        self.state = ServiceState::Stopped;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    fn summary(running: bool, enabled: Option<bool>) -> String {
        let mut summary = if running { "running" } else { "stopped" }.to_string();
        match enabled {
            Some(true) => summary.push_str(", enabled"),
            Some(false) => summary.push_str(", disabled"),
            None => {}
        }
        summary
    }

    fn status(&self, host: &dyn Host) -> Result<ServiceStatus> {
        host.service_status(&self.name)
            .map_err(|e| e.at(self.reference()))?
            .ok_or_else(|| {
                HostError::Unavailable(format!("service {} is not installed", self.name))
                    .at(self.reference())
            })
    }

    fn control(&self, host: &dyn Host, action: ServiceAction) -> Result<()> {
        log::info!("Service {}: {}", self.name, action.as_str());
        host.control_service(&self.name, action)
            .map_err(|e| e.at(self.reference()))
    }
}

impl Converge for ServiceParams {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Service
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        format!(
            "Service {} {}",
            self.name,
            Self::summary(self.state == ServiceState::Running, self.enabled)
        )
    }

    fn current_state(&self, host: &dyn Host) -> Result<ResourceState> {
        let status = self.status(host)?;
        let current = Self::summary(status.running, self.enabled.map(|_| status.enabled));
        let desired = self.desired_state();
        if ResourceState::present(current.clone()) == desired {
            Ok(desired)
        } else {
            Ok(ResourceState::Modified {
                from: current,
                to: Self::summary(self.state == ServiceState::Running, self.enabled),
            })
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present(Self::summary(
            self.state == ServiceState::Running,
            self.enabled,
        ))
    }

    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<ApplyResult> {
        let status = self.status(ctx.host)?;
        let mut changed = false;

        if let Some(enabled) = self.enabled
            && enabled != status.enabled
        {
            let action = if enabled {
                ServiceAction::Enable
            } else {
                ServiceAction::Disable
            };
            self.control(ctx.host, action)?;
            changed = true;
        }

        let want_running = self.state == ServiceState::Running;
        if want_running != status.running {
            let action = if want_running {
                ServiceAction::Start
            } else {
                ServiceAction::Stop
            };
            self.control(ctx.host, action)?;
            changed = true;
        }

        Ok(if changed {
            ApplyResult::Modified
        } else {
            ApplyResult::NoChange
        })
    }

    fn supports(&self, action: NotifyAction) -> bool {
        !matches!(action, NotifyAction::Run)
    }

    fn react(&self, action: NotifyAction, ctx: &ApplyContext<'_>) -> Result<ApplyResult> {
        let status = self.status(ctx.host)?;
        let host_action = match (action, status.running) {
            (NotifyAction::Apply, _) => return self.apply(ctx),
            // Declared stopped: new config is picked up at the next start
            (NotifyAction::Reload | NotifyAction::Restart, false)
                if self.state == ServiceState::Stopped =>
            {
                return Ok(ApplyResult::NoChange);
            }
            // A stopped service picks up new config by starting
            (NotifyAction::Reload | NotifyAction::Restart | NotifyAction::Start, false) => {
                ServiceAction::Start
            }
            (NotifyAction::Reload, true) => ServiceAction::Reload,
            (NotifyAction::Restart, true) => ServiceAction::Restart,
            (NotifyAction::Stop, true) => ServiceAction::Stop,
            (NotifyAction::Start, true) | (NotifyAction::Stop, false) => {
                return Ok(ApplyResult::NoChange);
            }
            (NotifyAction::Run, _) => {
                return Err(Error::Host {
                    resource: self.reference().to_string(),
                    reason: "services cannot run".to_string(),
                });
            }
        };
        self.control(ctx.host, host_action)?;
        Ok(ApplyResult::Modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;

    #[test]
    fn test_start_and_enable() {
        let host = MemoryHost::new().with_service("nginx", false, false);
        let ctx = ApplyContext::new(&host);
        let svc = ServiceParams::new("nginx").enabled(true);

        assert!(svc.needs_apply(&host).unwrap());
        assert_eq!(svc.apply(&ctx).unwrap(), ApplyResult::Modified);
        assert_eq!(svc.apply(&ctx).unwrap(), ApplyResult::NoChange);
        assert_eq!(
            host.service_status("nginx").unwrap(),
            Some(ServiceStatus {
                running: true,
                enabled: true
            })
        );
    }

    #[test]
    fn test_unknown_service_is_precondition_failure() {
        let host = MemoryHost::new();
        let ctx = ApplyContext::new(&host);
        let err = ServiceParams::new("uwsgi").apply(&ctx).unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");
    }

    #[test]
    fn test_reload_running_service() {
        let host = MemoryHost::new().with_service("nginx", true, true);
        let ctx = ApplyContext::new(&host);
        let svc = ServiceParams::new("nginx");
        assert_eq!(
            svc.react(NotifyAction::Reload, &ctx).unwrap(),
            ApplyResult::Modified
        );
        assert_eq!(host.service_actions("nginx"), vec![ServiceAction::Reload]);
    }

    #[test]
    fn test_reload_stopped_service_starts_it() {
        let host = MemoryHost::new().with_service("nginx", false, true);
        let ctx = ApplyContext::new(&host);
        ServiceParams::new("nginx")
            .react(NotifyAction::Reload, &ctx)
            .unwrap();
        assert_eq!(host.service_actions("nginx"), vec![ServiceAction::Start]);
    }

    #[test]
    fn test_reload_leaves_declared_stopped_service_stopped() {
        let host = MemoryHost::new().with_service("worker", false, false);
        let ctx = ApplyContext::new(&host);
        let svc = ServiceParams::new("worker").stopped();
        for action in [NotifyAction::Reload, NotifyAction::Restart] {
            assert_eq!(svc.react(action, &ctx).unwrap(), ApplyResult::NoChange);
        }
        assert!(host.service_actions("worker").is_empty());
        assert!(!host.service_status("worker").unwrap().unwrap().running);
    }

    #[test]
    fn test_run_is_not_supported() {
        assert!(!ServiceParams::new("nginx").supports(NotifyAction::Run));
        assert!(ServiceParams::new("nginx").supports(NotifyAction::Restart));
    }
}
