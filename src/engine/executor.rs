//! Convergence with terminal UI: plan, confirm, apply, summarize

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use declarative::{ConfirmCallback, Engine, Host, Outcome, Recipe, RunOptions, RunReport};
use std::time::Duration;

use super::differ::display_diff;
use crate::progress::TerminalProgress;
use crate::ui;

/// Options for a run (CLI-side, includes `yes` for confirmation skip)
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Don't make changes, just show what would happen
    pub dry_run: bool,
    /// Give up after this long
    pub timeout: Option<Duration>,
    /// Skip confirmation prompts
    pub yes: bool,
    /// List up-to-date resources too
    pub verbose: bool,
    pub quiet: bool,
}

/// Asks on the terminal
pub struct PromptConfirm;

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> std::io::Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()
            .map_err(std::io::Error::other)
    }
}

/// Show the plan, ask, then converge
///
/// Returns `None` when the user declines.
pub fn execute(
    node: &str,
    host: &dyn Host,
    recipes: &[Recipe],
    opts: &ExecuteOptions,
    confirm: &mut dyn ConfirmCallback,
) -> Result<Option<RunReport>> {
    let engine = Engine::new(node, host).with_options(RunOptions {
        dry_run: opts.dry_run,
        timeout: opts.timeout,
    });

    let diffs = engine.plan(recipes);
    if !opts.quiet {
        display_diff(&diffs);
    }

    if !diffs.is_empty()
        && !opts.yes
        && !opts.dry_run
        && !confirm
            .confirm("Continue?")
            .context("Failed to read confirmation")?
    {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(None);
    }

    let mut progress = TerminalProgress::new(opts.verbose, opts.quiet);
    let report = engine.converge_with(recipes, &mut progress);
    print_summary(&report);
    Ok(Some(report))
}

/// Print the outcome of a run
pub fn print_summary(report: &RunReport) {
    let summary = report.summary();
    println!();
    if report.dry_run {
        println!("  {} Dry run - no changes made", "ℹ".blue());
    } else if report.is_success() {
        println!("  {} {} converged", "✓".green().bold(), report.node.bold());
    } else if report.timed_out() {
        println!("  {} {} timed out", "⚠".yellow().bold(), report.node.bold());
    } else {
        println!(
            "  {} {} converged with errors",
            "⚠".yellow().bold(),
            report.node.bold()
        );
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.modified > 0 {
        println!("    • {} resources modified", summary.modified);
    }
    if summary.removed > 0 {
        println!("    • {} resources removed", summary.removed);
    }
    if summary.up_to_date > 0 {
        println!("    • {} resources up to date", summary.up_to_date);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
    if summary.notifications > 0 {
        println!("    • {} notifications delivered", summary.notifications);
    }
    println!("    • took {}", ui::format_duration(report.elapsed));

    if let Some(error) = &report.error {
        ui::error(&error.to_string());
    }
    for failed in report.resources().filter(|r| r.outcome.is_failed()) {
        if let Outcome::Failed { error } = &failed.outcome {
            ui::error(&format!("{}: {error}", failed.resource));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::resource::FileParams;
    use declarative::{AutoConfirm, AutoDecline, MemoryHost, Resource};

    fn recipe() -> Recipe {
        Recipe::new("motd").with_resource(Resource::new(FileParams::new("/etc/motd", "hi\n")))
    }

    fn quiet() -> ExecuteOptions {
        ExecuteOptions {
            quiet: true,
            ..ExecuteOptions::default()
        }
    }

    #[test]
    fn test_declined_run_changes_nothing() {
        let host = MemoryHost::new().with_dir("/etc");
        let report = execute("test", &host, &[recipe()], &quiet(), &mut AutoDecline).unwrap();
        assert!(report.is_none());
        assert!(host.journal().is_empty());
    }

    #[test]
    fn test_confirmed_run_converges() {
        let host = MemoryHost::new().with_dir("/etc");
        let report = execute("test", &host, &[recipe()], &quiet(), &mut AutoConfirm)
            .unwrap()
            .unwrap();
        assert!(report.is_success());
        assert_eq!(host.file_content("/etc/motd").as_deref(), Some("hi\n"));
    }

    #[test]
    fn test_dry_run_does_not_ask() {
        let host = MemoryHost::new().with_dir("/etc");
        let opts = ExecuteOptions {
            dry_run: true,
            ..quiet()
        };
        let report = execute("test", &host, &[recipe()], &opts, &mut AutoDecline)
            .unwrap()
            .unwrap();
        assert!(report.dry_run);
        assert!(host.journal().is_empty());
    }
}
