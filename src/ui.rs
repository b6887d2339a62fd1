use colored::{ColoredString, Colorize};
use declarative::{ApplyResult, Outcome, SkipReason};
use std::time::Duration;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// One-character marker for a resource outcome
pub fn outcome_symbol(outcome: &Outcome) -> ColoredString {
    match outcome {
        Outcome::Converged {
            result: ApplyResult::Created,
        } => "+".green(),
        Outcome::Converged {
            result: ApplyResult::Removed,
        } => "-".red(),
        Outcome::Converged { .. } => "~".yellow(),
        Outcome::Skipped {
            reason: SkipReason::UpToDate,
        } => "✓".dimmed(),
        Outcome::Skipped {
            reason: SkipReason::DryRun { .. },
        } => "?".cyan(),
        Outcome::Skipped { .. } => "-".dimmed(),
        Outcome::Failed { .. } => "✗".red(),
    }
}

/// Format a duration for humans: `850ms`, `4.2s`, `3m 05s`
pub fn format_duration(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.1}s", elapsed.as_secs_f64())
    } else {
        let secs = elapsed.as_secs();
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}
