use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cozinha")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge this machine to the state its recipes describe", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Cookbook directory (recipes/, attributes/, roles/, environments/, templates/)
    #[arg(short, long, global = true, env = "COZINHA_COOKBOOK")]
    pub cookbook: Option<PathBuf>,

    /// Role whose attributes apply to this node (repeatable)
    #[arg(short, long = "role", global = true)]
    pub roles: Vec<String>,

    /// Environment whose attributes apply to this node
    #[arg(short, long, global = true)]
    pub environment: Option<String>,

    /// Node name shown in reports
    #[arg(long, global = true)]
    pub node: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Converge recipes (and their dependencies) on this machine
    Run(RunArgs),

    /// Show what a run would change, without changing anything
    Plan(PlanArgs),

    /// Show resolved node attributes and the layer each comes from
    Attrs {
        /// Only this key or subtree (e.g. nginx.gzip)
        key: Option<String>,
    },

    /// Compose every recipe and check resources, templates and notifications
    Validate,

    /// List recipes, roles and environments in the cookbook
    List,

    /// Show the outcome of the last run
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct RunArgs {
    /// Recipes to converge; defaults to the configured run list
    pub recipes: Vec<String>,

    /// Report what would change without changing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Give up after this many seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser)]
pub struct PlanArgs {
    /// Recipes to plan; defaults to the configured run list
    pub recipes: Vec<String>,
}
