//! Plan display

use colored::Colorize;
use declarative::{DiffSummary, ResourceDiff, ResourceKind, ResourceState, group_by_kind};

fn kind_title(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Package => "Packages",
        ResourceKind::PackageRepository => "Package repositories",
        ResourceKind::Directory => "Directories",
        ResourceKind::File => "Files",
        ResourceKind::Template => "Templates",
        ResourceKind::Link => "Links",
        ResourceKind::Service => "Services",
        ResourceKind::Database => "Databases",
        ResourceKind::DatabaseUser => "Database users",
        ResourceKind::Execute => "Commands",
    }
}

/// Short `from → to` text for a diff
pub fn describe_change(diff: &ResourceDiff) -> String {
    match (&diff.current, &diff.desired) {
        (ResourceState::Absent, ResourceState::Present { details }) => format!(
            "(absent){}",
            details
                .as_ref()
                .map(|d| format!(" → {d}"))
                .unwrap_or_default()
        ),
        (ResourceState::Modified { from, to }, _) => format!("{from} → {to}"),
        (ResourceState::Present { details: from }, ResourceState::Present { details: to }) => {
            format!(
                "{} → {}",
                from.as_deref().unwrap_or("current"),
                to.as_deref().unwrap_or("desired")
            )
        }
        (_, ResourceState::Absent) => "(will remove)".to_string(),
        (ResourceState::Unknown, _) => match &diff.observe_error {
            Some(reason) => format!("(unknown until earlier resources apply: {reason})"),
            None => "(unknown)".to_string(),
        },
        _ => String::new(),
    }
}

/// Display a list of diffs in a user-friendly format
pub fn display_diff(diffs: &[ResourceDiff]) {
    if diffs.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Convergence Plan".bold()
    );
    println!("│");

    for (kind, kind_diffs) in group_by_kind(diffs) {
        println!("│ {}", kind_title(kind).bold());

        for diff in kind_diffs {
            let symbol = if diff.is_unknown() {
                "?".dimmed()
            } else if diff.is_addition() {
                "+".green()
            } else if diff.is_removal() {
                "-".red()
            } else {
                "~".yellow()
            };

            println!(
                "│   {} {:<36} {}",
                symbol,
                diff.resource.to_string(),
                describe_change(diff).dimmed()
            );
        }
        println!("│");
    }

    let summary = DiffSummary::from_diffs(diffs);
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} changes ({} add, {} change, {} remove, {} unknown)",
        summary.total().to_string().bold(),
        summary.additions.to_string().green(),
        summary.modifications.to_string().yellow(),
        summary.removals.to_string().red(),
        summary.unknown.to_string().dimmed()
    );
    println!("└─────────────────────────────────────────────────────┘");
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::ResourceRef;

    fn diff(current: ResourceState, desired: ResourceState) -> ResourceDiff {
        ResourceDiff {
            resource: ResourceRef::new(ResourceKind::Package, "nginx"),
            recipe: "nginx".to_string(),
            description: "Install package nginx".to_string(),
            current,
            desired,
            observe_error: None,
        }
    }

    #[test]
    fn test_describe_change() {
        let added = diff(ResourceState::Absent, ResourceState::present("1.24"));
        assert_eq!(describe_change(&added), "(absent) → 1.24");

        let upgraded = diff(
            ResourceState::Modified {
                from: "1.18".to_string(),
                to: "1.24".to_string(),
            },
            ResourceState::present("1.24"),
        );
        assert_eq!(describe_change(&upgraded), "1.18 → 1.24");

        let removed = diff(ResourceState::present("1.24"), ResourceState::Absent);
        assert_eq!(describe_change(&removed), "(will remove)");

        let mut unknown = diff(ResourceState::Unknown, ResourceState::present("running"));
        unknown.observe_error = Some("unknown service nginx".to_string());
        assert!(describe_change(&unknown).contains("unknown service nginx"));
    }
}
