//! Run reports
//!
//! Every resource in a run ends with exactly one [`Outcome`]. Reports are
//! serializable so the CLI can persist the last run and print it later.

use crate::error::Error;
use crate::resource::{NotifyAction, ResourceRef};
use crate::types::ApplyResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a resource was not applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Already in the desired state
    UpToDate,
    /// An earlier resource of the same recipe failed
    Aborted,
    /// The run ran out of time before reaching it
    TimedOut,
    /// Dry run: would have changed from `from` to `to`
    DryRun { from: String, to: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpToDate => f.write_str("up to date"),
            Self::Aborted => f.write_str("aborted"),
            Self::TimedOut => f.write_str("timed out"),
            Self::DryRun { from, to } => write!(f, "would change: {from} -> {to}"),
        }
    }
}

/// Terminal outcome of a resource or notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Converged { result: ApplyResult },
    Skipped { reason: SkipReason },
    Failed { error: Error },
}

impl Outcome {
    pub fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Whether the resource changed the machine
    pub fn changed(&self) -> bool {
        matches!(self, Self::Converged { result } if result.is_change())
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged { result } => {
                let verb = match result {
                    ApplyResult::NoChange => "unchanged",
                    ApplyResult::Created => "created",
                    ApplyResult::Modified => "modified",
                    ApplyResult::Removed => "removed",
                };
                write!(f, "converged ({verb})")
            }
            Self::Skipped { reason } => write!(f, "skipped ({reason})"),
            Self::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub resource: ResourceRef,
    pub description: String,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeReport {
    pub name: String,
    pub resources: Vec<ResourceReport>,
}

impl RecipeReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resources: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        !self.resources.iter().any(|r| r.outcome.is_failed())
    }

    /// First failed resource, the one that aborted the recipe
    pub fn failure(&self) -> Option<&ResourceReport> {
        self.resources.iter().find(|r| r.outcome.is_failed())
    }

    pub fn changed(&self) -> usize {
        self.resources.iter().filter(|r| r.outcome.changed()).count()
    }
}

/// A delivered notification, after deduplication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationReport {
    pub target: ResourceRef,
    pub action: NotifyAction,
    /// Every changed resource that asked for this trigger
    pub sources: Vec<ResourceRef>,
    pub outcome: Outcome,
}

/// Result of converging one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub node: String,
    pub dry_run: bool,
    pub recipes: Vec<RecipeReport>,
    pub notifications: Vec<NotificationReport>,
    /// Run-level error: composition failures and timeouts
    pub error: Option<Error>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn new(node: impl Into<String>, dry_run: bool) -> Self {
        Self {
            node: node.into(),
            dry_run,
            recipes: Vec::new(),
            notifications: Vec::new(),
            error: None,
            elapsed: Duration::ZERO,
        }
    }

    /// A run that stopped before applying anything
    pub fn failed(node: impl Into<String>, error: Error) -> Self {
        Self {
            error: Some(error),
            ..Self::new(node, false)
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
            && self.recipes.iter().all(RecipeReport::is_success)
            && !self.notifications.iter().any(|n| n.outcome.is_failed())
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.error, Some(Error::TimedOut { .. }))
    }

    /// Process exit status: 0 on full convergence, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceReport> {
        self.recipes.iter().flat_map(|r| r.resources.iter())
    }

    /// Outcome of a resource by reference
    pub fn outcome(&self, resource: &ResourceRef) -> Option<&Outcome> {
        self.resources()
            .find(|r| &r.resource == resource)
            .map(|r| &r.outcome)
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for report in self.resources() {
            summary.add(&report.outcome);
        }
        summary.notifications = self.notifications.len();
        summary
    }
}

/// Counts of resource outcomes in a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub created: usize,
    pub modified: usize,
    pub removed: usize,
    pub up_to_date: usize,
    pub skipped: usize,
    pub failed: usize,
    pub notifications: usize,
}

impl RunSummary {
    pub fn add(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Converged { result } => match result {
                ApplyResult::Created => self.created += 1,
                ApplyResult::Modified => self.modified += 1,
                ApplyResult::Removed => self.removed += 1,
                ApplyResult::NoChange => self.up_to_date += 1,
            },
            Outcome::Skipped {
                reason: SkipReason::UpToDate,
            } => self.up_to_date += 1,
            Outcome::Skipped { .. } => self.skipped += 1,
            Outcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn changed(&self) -> usize {
        self.created + self.modified + self.removed
    }

    pub fn total(&self) -> usize {
        self.changed() + self.up_to_date + self.skipped + self.failed
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} changed, {} up to date, {} skipped, {} failed",
            self.changed(),
            self.up_to_date,
            self.skipped,
            self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;

    fn report(name: &str, outcome: Outcome) -> ResourceReport {
        ResourceReport {
            resource: ResourceRef::new(ResourceKind::Package, name),
            description: format!("Install {name}"),
            outcome,
            elapsed: Duration::from_millis(3),
        }
    }

    #[test]
    fn test_failed_resource_fails_run() {
        let mut run = RunReport::new("web1", false);
        let mut recipe = RecipeReport::new("nginx");
        recipe.resources.push(report(
            "nginx",
            Outcome::Converged {
                result: ApplyResult::Created,
            },
        ));
        recipe.resources.push(report(
            "missing",
            Outcome::Failed {
                error: Error::PreconditionFailed {
                    resource: "package[missing]".into(),
                    reason: "not available".into(),
                },
            },
        ));
        run.recipes.push(recipe);

        assert!(!run.is_success());
        assert_eq!(run.exit_code(), 1);
        let summary = run.summary();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total(), 2);
    }

    #[test]
    fn test_timeout_fails_run() {
        let mut run = RunReport::new("web1", false);
        run.error = Some(Error::TimedOut {
            elapsed: Duration::from_secs(5),
        });
        assert!(run.timed_out());
        assert_eq!(run.exit_code(), 1);
    }

    #[test]
    fn test_report_json_roundtrip() {
        let mut run = RunReport::new("db1", true);
        let mut recipe = RecipeReport::new("mysql");
        recipe.resources.push(report(
            "mysql-server",
            Outcome::skipped(SkipReason::DryRun {
                from: "absent".into(),
                to: "installed".into(),
            }),
        ));
        run.recipes.push(recipe);

        let json = serde_json::to_string(&run).unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, run);
        assert!(json.contains("\"package[mysql-server]\""));
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            Outcome::skipped(SkipReason::Aborted).to_string(),
            "skipped (aborted)"
        );
        assert_eq!(
            Outcome::Converged {
                result: ApplyResult::Modified
            }
            .to_string(),
            "converged (modified)"
        );
    }
}
