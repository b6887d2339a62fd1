//! `run` and `plan`

use anyhow::{Context as AnyhowContext, Result};
use declarative::{Engine, RunReport};
use std::time::Duration;

use super::Session;
use crate::Context;
use crate::cli::{PlanArgs, RunArgs};
use crate::engine::{self, ExecuteOptions, PromptConfirm};
use crate::state::LastRun;
use crate::system::SystemHost;
use crate::ui;

/// Converge the run list on this machine; returns the process exit status
pub fn run(ctx: &Context, args: RunArgs) -> Result<i32> {
    let session = Session::open(ctx)?;
    let run_list = session.run_list(&args.recipes)?;

    ui::header(&format!("Converging {}", session.node));
    ui::kv("cookbook", &session.cookbook_dir.display().to_string());
    ui::kv("run list", &run_list.join(", "));

    let recipes = match session.cookbook.compose(&run_list, &session.attrs) {
        Ok(recipes) => recipes,
        Err(error) => {
            ui::error(&error.to_string());
            if !args.dry_run {
                record(&session, &run_list, RunReport::failed(&session.node, error))?;
            }
            return Ok(1);
        }
    };
    let order: Vec<&str> = recipes.iter().map(|r| r.name.as_str()).collect();
    ui::kv("order", &order.join(" → "));

    let opts = ExecuteOptions {
        dry_run: args.dry_run,
        timeout: args
            .timeout
            .map(Duration::from_secs)
            .or_else(|| session.config.timeout()),
        yes: args.yes,
        verbose: ctx.verbose > 0,
        quiet: ctx.quiet,
    };

    let host = SystemHost::new();
    let Some(report) =
        engine::execute(&session.node, &host, &recipes, &opts, &mut PromptConfirm)?
    else {
        return Ok(0);
    };

    if !report.dry_run {
        record(&session, &run_list, report.clone())?;
    }
    Ok(report.exit_code())
}

/// Show what `run` would change
pub fn plan(ctx: &Context, args: PlanArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let run_list = session.run_list(&args.recipes)?;
    let recipes = session
        .cookbook
        .compose(&run_list, &session.attrs)
        .context("Could not compose the run list")?;

    ui::header(&format!("Plan for {}", session.node));
    let host = SystemHost::new();
    let diffs = Engine::new(&session.node, &host).plan(&recipes);
    engine::display_diff(&diffs);
    Ok(())
}

fn record(session: &Session, run_list: &[String], report: RunReport) -> Result<()> {
    LastRun::new(
        &session.cookbook_dir,
        run_list,
        &session.roles,
        session.environment.as_deref(),
        report,
    )
    .save()
}
