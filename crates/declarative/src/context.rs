//! Apply context and callback traits
//!
//! These traits let the engine report progress and ask for confirmation
//! without depending on a particular terminal UI.

use crate::host::Host;
use crate::report::{Outcome, RecipeReport};
use crate::resource::{NotifyAction, ResourceRef};

/// Context passed to resource apply operations
pub struct ApplyContext<'a> {
    /// Machine being converged
    pub host: &'a dyn Host,
}

impl<'a> ApplyContext<'a> {
    pub fn new(host: &'a dyn Host) -> Self {
        Self { host }
    }
}

/// Progress callback for convergence runs
///
/// Implement this trait to receive progress updates during a run.
pub trait ProgressCallback {
    /// Called before the first resource of a recipe
    fn on_recipe_start(&mut self, recipe: &str, resources: usize);

    /// Called when a resource enters `Applying`
    fn on_resource_start(&mut self, resource: &ResourceRef, description: &str);

    /// Called when a resource reaches a terminal outcome
    fn on_resource_complete(&mut self, resource: &ResourceRef, outcome: &Outcome);

    /// Called after a notification has been delivered (or failed)
    fn on_notification(&mut self, target: &ResourceRef, action: NotifyAction, ok: bool);

    /// Called after a recipe and its due notifications have finished
    fn on_recipe_complete(&mut self, report: &RecipeReport);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback {
    /// Ask the user to confirm an action
    fn confirm(&mut self, prompt: &str) -> std::io::Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_recipe_start(&mut self, _recipe: &str, _resources: usize) {}
    fn on_resource_start(&mut self, _resource: &ResourceRef, _description: &str) {}
    fn on_resource_complete(&mut self, _resource: &ResourceRef, _outcome: &Outcome) {}
    fn on_notification(&mut self, _target: &ResourceRef, _action: NotifyAction, _ok: bool) {}
    fn on_recipe_complete(&mut self, _report: &RecipeReport) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> std::io::Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> std::io::Result<bool> {
        Ok(false)
    }
}
