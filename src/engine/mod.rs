//! Terminal side of a convergence run
//!
//! 1. Diffing - show what the run would change
//! 2. Confirming - unless `--yes` or `--dry-run`
//! 3. Executing - converge with live progress and a summary

pub mod differ;
pub mod executor;

pub use differ::display_diff;
pub use executor::{ExecuteOptions, PromptConfirm, execute};
