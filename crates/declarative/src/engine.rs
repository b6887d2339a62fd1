//! Convergence engine
//!
//! Runs composed recipes against one host:
//!
//! 1. the notification graph is built and checked (unknown targets, cycles)
//! 2. recipes run in order, each resource going
//!    `Pending -> Applying -> {Converged, Failed}` or being skipped
//! 3. a failed resource skips the rest of its own recipe only
//! 4. after each recipe, queued notifications whose target has already had
//!    its turn are delivered, once per `(target, action)` for the whole run
//!
//! The time budget is checked before each resource and notification. Once it
//! runs out nothing else is applied and the report carries `TimedOut`; the
//! host keeps whatever partial state was reached.

use crate::attributes::Attributes;
use crate::context::{ApplyContext, NoProgress, ProgressCallback};
use crate::cookbook::Cookbook;
use crate::diff::{ResourceDiff, compute_diffs};
use crate::error::Error;
use crate::graph::NotificationGraph;
use crate::host::Host;
use crate::recipe::Recipe;
use crate::report::{
    NotificationReport, Outcome, RecipeReport, ResourceReport, RunReport, SkipReason,
};
use crate::resource::{NotifyAction, Resource, ResourceRef};
use crate::types::{ApplyResult, ResourceState};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Options for a convergence run
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Observe and report, never mutate
    pub dry_run: bool,
    /// Overall time budget for the run
    pub timeout: Option<Duration>,
}

/// Converges one node
pub struct Engine<'a> {
    node: String,
    host: &'a dyn Host,
    options: RunOptions,
}

/// A notification waiting for its target's recipe to finish
struct Queued {
    target: ResourceRef,
    action: NotifyAction,
    sources: Vec<ResourceRef>,
}

/// Mutable state of one run
struct RunState<'r> {
    started: Instant,
    /// Recipe index and resource for every reference in the run
    index: HashMap<ResourceRef, (usize, &'r Resource)>,
    queue: Vec<Queued>,
    fired: HashSet<(ResourceRef, NotifyAction)>,
    /// Resources that failed or never got to apply
    unusable: HashSet<ResourceRef>,
    report: RunReport,
}

impl<'a> Engine<'a> {
    pub fn new(node: impl Into<String>, host: &'a dyn Host) -> Self {
        Self {
            node: node.into(),
            host,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.options.dry_run = dry_run;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Resolve, compose and converge a run list from a cookbook
    ///
    /// Composition errors (unknown recipes, missing attributes, bad
    /// templates) end the run before any resource is applied.
    pub fn run<S: AsRef<str>>(
        &self,
        cookbook: &Cookbook,
        run_list: &[S],
        attrs: &Attributes,
        progress: &mut dyn ProgressCallback,
    ) -> RunReport {
        match cookbook.compose(run_list, attrs) {
            Ok(recipes) => self.converge_with(&recipes, progress),
            Err(error) => {
                log::error!("{}: {}", self.node, error);
                let mut report = RunReport::failed(&self.node, error);
                report.dry_run = self.options.dry_run;
                report
            }
        }
    }

    /// Changes the run would make, without applying anything
    pub fn plan(&self, recipes: &[Recipe]) -> Vec<ResourceDiff> {
        compute_diffs(recipes, self.host)
    }

    pub fn converge(&self, recipes: &[Recipe]) -> RunReport {
        self.converge_with(recipes, &mut NoProgress)
    }

    pub fn converge_with(
        &self,
        recipes: &[Recipe],
        progress: &mut dyn ProgressCallback,
    ) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::new(&self.node, self.options.dry_run);

        let graph = match NotificationGraph::build(recipes) {
            Ok(graph) => graph,
            Err(error) => {
                log::error!("{}: {}", self.node, error);
                report.error = Some(error);
                return report;
            }
        };

        let mut state = RunState {
            started,
            index: recipes
                .iter()
                .enumerate()
                .flat_map(|(i, recipe)| {
                    recipe.resources.iter().map(move |r| (r.reference(), (i, r)))
                })
                .collect(),
            queue: Vec::new(),
            fired: HashSet::new(),
            unusable: HashSet::new(),
            report,
        };
        let ctx = ApplyContext::new(self.host);

        for (position, recipe) in recipes.iter().enumerate() {
            log::info!("{}: recipe {}", self.node, recipe.name);
            progress.on_recipe_start(&recipe.name, recipe.resources.len());
            let mut recipe_report = RecipeReport::new(&recipe.name);
            let mut aborted = false;

            for resource in &recipe.resources {
                let reference = resource.reference();
                let start = Instant::now();

                let outcome = if state.timed_out() {
                    Outcome::skipped(SkipReason::TimedOut)
                } else if aborted {
                    Outcome::skipped(SkipReason::Aborted)
                } else if self.check_deadline(&mut state) {
                    Outcome::skipped(SkipReason::TimedOut)
                } else {
                    progress.on_resource_start(&reference, &resource.description());
                    self.converge_resource(resource, &ctx)
                };

                match &outcome {
                    Outcome::Failed { error } => {
                        log::error!("{}: {} failed: {}", self.node, reference, error);
                        aborted = true;
                        state.unusable.insert(reference.clone());
                    }
                    Outcome::Skipped {
                        reason: SkipReason::Aborted | SkipReason::TimedOut,
                    } => {
                        state.unusable.insert(reference.clone());
                    }
                    _ => {}
                }
                if outcome.changed() || is_dry_run_change(&outcome) {
                    state.enqueue(&graph, &reference);
                }

                progress.on_resource_complete(&reference, &outcome);
                recipe_report.resources.push(ResourceReport {
                    resource: reference,
                    description: resource.description(),
                    outcome,
                    elapsed: start.elapsed(),
                });
            }

            self.deliver(position, &graph, &ctx, &mut state, progress);
            progress.on_recipe_complete(&recipe_report);
            state.report.recipes.push(recipe_report);
        }

        // Only a timeout leaves notifications queued
        for queued in std::mem::take(&mut state.queue) {
            log::warn!(
                "{}: dropping {} for {}",
                self.node,
                queued.action,
                queued.target
            );
            state.report.notifications.push(NotificationReport {
                target: queued.target,
                action: queued.action,
                sources: queued.sources,
                outcome: Outcome::skipped(SkipReason::TimedOut),
            });
        }

        let mut report = state.report;
        report.elapsed = started.elapsed();
        log::info!(
            "{}: {} in {:.1}s",
            self.node,
            report.summary(),
            report.elapsed.as_secs_f64()
        );
        report
    }

    /// Apply one resource (or just observe it in a dry run)
    fn converge_resource(&self, resource: &Resource, ctx: &ApplyContext<'_>) -> Outcome {
        let reference = resource.reference();
        log::debug!("{reference}: applying");

        if self.options.dry_run {
            let desired = resource.desired_state();
            return match resource.current_state(ctx.host) {
                Ok(current) if current == desired => Outcome::skipped(SkipReason::UpToDate),
                Ok(current) => Outcome::skipped(SkipReason::DryRun {
                    from: describe_state(&current),
                    to: describe_state(&desired),
                }),
                // Usually state an earlier resource would have created
                Err(error) => Outcome::skipped(SkipReason::DryRun {
                    from: format!("unknown ({error})"),
                    to: describe_state(&desired),
                }),
            };
        }

        match resource.apply(ctx) {
            Ok(ApplyResult::NoChange) => {
                log::debug!("{reference}: up to date");
                Outcome::skipped(SkipReason::UpToDate)
            }
            Ok(result) => {
                log::info!("{reference}: {result:?}");
                Outcome::Converged { result }
            }
            Err(error) => Outcome::Failed { error },
        }
    }

    /// Deliver every queued notification whose target's recipe has run
    fn deliver(
        &self,
        position: usize,
        graph: &NotificationGraph,
        ctx: &ApplyContext<'_>,
        state: &mut RunState<'_>,
        progress: &mut dyn ProgressCallback,
    ) {
        while let Some(queued) = state.take_due(position) {
            let outcome = if state.timed_out() || self.check_deadline(state) {
                state.queue.push(queued);
                break;
            } else if state.unusable.contains(&queued.target) {
                Outcome::skipped(SkipReason::Aborted)
            } else if self.options.dry_run {
                Outcome::skipped(SkipReason::DryRun {
                    from: format!("notified by {}", join_refs(&queued.sources)),
                    to: queued.action.to_string(),
                })
            } else {
                self.react(&queued, ctx, state)
            };

            state
                .fired
                .insert((queued.target.clone(), queued.action));
            if outcome.changed() {
                state.enqueue(graph, &queued.target);
            }
            if let Outcome::Failed { error } = &outcome {
                log::error!(
                    "{}: {} {} failed: {}",
                    self.node,
                    queued.action,
                    queued.target,
                    error
                );
            }
            progress.on_notification(&queued.target, queued.action, !outcome.is_failed());
            state.report.notifications.push(NotificationReport {
                target: queued.target,
                action: queued.action,
                sources: queued.sources,
                outcome,
            });
        }
    }

    fn react(&self, queued: &Queued, ctx: &ApplyContext<'_>, state: &RunState<'_>) -> Outcome {
        let Some((_, target)) = state.index.get(&queued.target) else {
            return Outcome::skipped(SkipReason::Aborted);
        };
        log::info!(
            "{} -> {} {}",
            join_refs(&queued.sources),
            queued.action,
            queued.target
        );
        match target.react(queued.action, ctx) {
            Ok(result) => Outcome::Converged { result },
            Err(error) => Outcome::Failed { error },
        }
    }

    /// Record a timeout if the budget is spent; returns whether it is
    fn check_deadline(&self, state: &mut RunState<'_>) -> bool {
        let Some(timeout) = self.options.timeout else {
            return false;
        };
        let elapsed = state.started.elapsed();
        if elapsed < timeout {
            return false;
        }
        log::error!("{}: run timed out after {:?}", self.node, elapsed);
        state.report.error = Some(Error::TimedOut { elapsed });
        true
    }
}

impl RunState<'_> {
    fn timed_out(&self) -> bool {
        self.report.timed_out()
    }

    /// Queue the notifications a changed resource sends
    fn enqueue(&mut self, graph: &NotificationGraph, source: &ResourceRef) {
        for notification in graph.notifications(source) {
            let key = (notification.target.clone(), notification.action);
            if self.fired.contains(&key) {
                log::debug!(
                    "{} {} already delivered this run",
                    notification.action,
                    notification.target
                );
                continue;
            }
            match self
                .queue
                .iter_mut()
                .find(|q| q.target == notification.target && q.action == notification.action)
            {
                Some(queued) => queued.sources.push(source.clone()),
                None => self.queue.push(Queued {
                    target: notification.target.clone(),
                    action: notification.action,
                    sources: vec![source.clone()],
                }),
            }
        }
    }

    /// Next queued notification whose target belongs to a finished recipe
    fn take_due(&mut self, position: usize) -> Option<Queued> {
        let due = self.queue.iter().position(|q| {
            self.index
                .get(&q.target)
                .is_none_or(|(recipe, _)| *recipe <= position)
        })?;
        Some(self.queue.remove(due))
    }
}

fn is_dry_run_change(outcome: &Outcome) -> bool {
    matches!(
        outcome,
        Outcome::Skipped {
            reason: SkipReason::DryRun { .. }
        }
    )
}

fn describe_state(state: &ResourceState) -> String {
    match state {
        ResourceState::Present { details: Some(d) } => d.clone(),
        ResourceState::Present { details: None } => "present".to_string(),
        ResourceState::Absent => "absent".to_string(),
        ResourceState::Modified { from, .. } => from.clone(),
        ResourceState::Unknown => "unknown".to_string(),
    }
}

fn join_refs(refs: &[ResourceRef]) -> String {
    refs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
