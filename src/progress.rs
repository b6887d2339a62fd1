//! Terminal progress for convergence runs

use colored::Colorize;
use declarative::{NotifyAction, Outcome, ProgressCallback, RecipeReport, ResourceRef, SkipReason};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

use crate::ui;

/// Spinner while a resource applies, one line per outcome afterwards
///
/// Up-to-date resources are only listed when `verbose` is set.
pub struct TerminalProgress {
    spinner: Option<ProgressBar>,
    started: Instant,
    verbose: bool,
    quiet: bool,
}

impl TerminalProgress {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self {
            spinner: None,
            started: Instant::now(),
            verbose,
            quiet,
        }
    }

    fn start_spinner(&self, message: String) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("  {spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "),
        );
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn finish_spinner(&mut self) {
        if let Some(pb) = self.spinner.take() {
            pb.finish_and_clear();
        }
    }

    fn line(&self, text: String) {
        if !self.quiet {
            println!("{text}");
        }
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_recipe_start(&mut self, recipe: &str, resources: usize) {
        if !self.quiet {
            ui::section(&format!("Recipe {recipe}"));
            ui::dim(&format!("{resources} resources"));
        }
    }

    fn on_resource_start(&mut self, _resource: &ResourceRef, description: &str) {
        self.finish_spinner();
        self.started = Instant::now();
        self.spinner = Some(self.start_spinner(description.to_string()));
    }

    fn on_resource_complete(&mut self, resource: &ResourceRef, outcome: &Outcome) {
        self.finish_spinner();
        let elapsed = ui::format_duration(self.started.elapsed());
        match outcome {
            Outcome::Skipped {
                reason: SkipReason::UpToDate,
            } if !self.verbose => {}
            Outcome::Failed { error } => {
                self.line(format!(
                    "  {} {} {}",
                    ui::outcome_symbol(outcome),
                    resource.to_string().bold(),
                    error.to_string().red()
                ));
            }
            _ => {
                self.line(format!(
                    "  {} {} {} {}",
                    ui::outcome_symbol(outcome),
                    resource,
                    outcome.to_string().dimmed(),
                    format!("({elapsed})").dimmed()
                ));
            }
        }
    }

    fn on_notification(&mut self, target: &ResourceRef, action: NotifyAction, ok: bool) {
        self.finish_spinner();
        let status = if ok { "✓".green() } else { "✗".red() };
        self.line(format!("  {} ↳ {action} {target}", status));
    }

    fn on_recipe_complete(&mut self, report: &RecipeReport) {
        self.finish_spinner();
        if let Some(failed) = report.failure() {
            self.line(format!(
                "  {} recipe {} stopped at {}",
                "✗".red(),
                report.name.bold(),
                failed.resource
            ));
        }
    }
}
