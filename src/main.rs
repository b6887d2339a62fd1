mod cli;
mod commands;
mod config;
mod engine;
mod loader;
mod paths;
mod progress;
mod runner;
mod state;
mod system;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub cookbook: Option<PathBuf>,
    pub roles: Vec<String>,
    pub environment: Option<String>,
    pub node: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        cookbook: cli.cookbook,
        roles: cli.roles,
        environment: cli.environment,
        node: cli.node,
    };

    let code = match cli.command {
        Command::Run(args) => commands::converge::run(&ctx, args)?,
        Command::Plan(args) => {
            commands::converge::plan(&ctx, args)?;
            0
        }
        Command::Attrs { key } => {
            commands::inspect::attrs(&ctx, key.as_deref())?;
            0
        }
        Command::Validate => commands::inspect::validate(&ctx)?,
        Command::List => {
            commands::inspect::list(&ctx)?;
            0
        }
        Command::Status => {
            commands::status::run(&ctx)?;
            0
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "cozinha", &mut io::stdout());
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
