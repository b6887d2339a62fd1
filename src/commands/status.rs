//! `status`: the last recorded run

use anyhow::Result;
use colored::Colorize;
use declarative::{Outcome, RunReport, SkipReason};

use crate::Context;
use crate::engine::executor::print_summary;
use crate::state::LastRun;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let Some(last) = LastRun::load()? else {
        ui::info("No runs recorded yet");
        return Ok(());
    };

    ui::header(&format!("Last run on {}", last.report.node));
    ui::kv(
        "finished",
        &last
            .finished_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
    );
    ui::kv("cookbook", &last.cookbook.display().to_string());
    ui::kv("run list", &last.run_list.join(", "));
    if !last.roles.is_empty() {
        ui::kv("roles", &last.roles.join(", "));
    }
    if let Some(env) = &last.environment {
        ui::kv("environment", env);
    }

    show_resources(&last.report, ctx.verbose > 0);
    print_summary(&last.report);
    Ok(())
}

/// Recipes and notifications of a run; up-to-date resources only when verbose
fn show_resources(report: &RunReport, verbose: bool) {
    for recipe in &report.recipes {
        ui::section(&recipe.name);
        for resource in &recipe.resources {
            let up_to_date = matches!(
                resource.outcome,
                Outcome::Skipped {
                    reason: SkipReason::UpToDate
                }
            );
            if up_to_date && !verbose {
                continue;
            }
            println!(
                "  {} {:<36} {}",
                ui::outcome_symbol(&resource.outcome),
                resource.resource.to_string(),
                resource.outcome.to_string().dimmed()
            );
        }
    }

    if !report.notifications.is_empty() {
        ui::section("Notifications");
        for notification in &report.notifications {
            let sources: Vec<String> = notification
                .sources
                .iter()
                .map(ToString::to_string)
                .collect();
            println!(
                "  {} {} {} {}",
                ui::outcome_symbol(&notification.outcome),
                notification.action,
                notification.target,
                format!("(from {})", sources.join(", ")).dimmed()
            );
        }
    }
}
