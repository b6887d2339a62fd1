//! Diff computation for composed recipes

use crate::host::Host;
use crate::recipe::Recipe;
use crate::resource::{Resource, ResourceKind, ResourceRef};
use crate::types::ResourceState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A diff between current and desired state of a resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDiff {
    pub resource: ResourceRef,
    /// Recipe the resource belongs to
    pub recipe: String,
    /// Human-readable description
    pub description: String,
    pub current: ResourceState,
    pub desired: ResourceState,
    /// Why the current state could not be observed, if it couldn't
    pub observe_error: Option<String>,
}

impl ResourceDiff {
    /// Create a diff from a resource, returning None if no changes needed
    ///
    /// A resource whose state can't be observed yet (say, a service whose
    /// package an earlier resource installs) shows as `Unknown`.
    pub fn from_resource(recipe: &str, resource: &Resource, host: &dyn Host) -> Option<Self> {
        let (current, observe_error) = match resource.current_state(host) {
            Ok(state) => (state, None),
            Err(e) => (ResourceState::Unknown, Some(e.to_string())),
        };
        let desired = resource.desired_state();

        if current == desired {
            return None;
        }

        Some(Self {
            resource: resource.reference(),
            recipe: recipe.to_string(),
            description: resource.description(),
            current,
            desired,
            observe_error,
        })
    }

    /// Check if this diff represents an addition
    pub fn is_addition(&self) -> bool {
        matches!(
            (&self.current, &self.desired),
            (ResourceState::Absent, ResourceState::Present { .. })
        )
    }

    /// Check if this diff represents a removal
    pub fn is_removal(&self) -> bool {
        matches!(
            (&self.current, &self.desired),
            (ResourceState::Present { .. }, ResourceState::Absent)
        )
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.current, ResourceState::Unknown)
    }
}

/// Compute diffs for composed recipes in run order
///
/// Returns only resources that have differences between current and desired state.
pub fn compute_diffs(recipes: &[Recipe], host: &dyn Host) -> Vec<ResourceDiff> {
    recipes
        .iter()
        .flat_map(|recipe| {
            recipe
                .resources
                .iter()
                .filter_map(|r| ResourceDiff::from_resource(&recipe.name, r, host))
        })
        .collect()
}

/// Diff summary statistics
#[derive(Debug, Clone, Default)]
pub struct DiffSummary {
    /// Number of resources to add
    pub additions: usize,
    /// Number of resources to remove
    pub removals: usize,
    /// Number of resources to modify
    pub modifications: usize,
    /// Resources whose current state couldn't be observed
    pub unknown: usize,
}

impl DiffSummary {
    /// Create a summary from a list of diffs
    pub fn from_diffs(diffs: &[ResourceDiff]) -> Self {
        let mut summary = Self::default();
        for diff in diffs {
            if diff.is_unknown() {
                summary.unknown += 1;
            } else if diff.is_addition() {
                summary.additions += 1;
            } else if diff.is_removal() {
                summary.removals += 1;
            } else {
                summary.modifications += 1;
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications + self.unknown
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group diffs by resource kind
pub fn group_by_kind(diffs: &[ResourceDiff]) -> BTreeMap<ResourceKind, Vec<&ResourceDiff>> {
    let mut groups: BTreeMap<ResourceKind, Vec<&ResourceDiff>> = BTreeMap::new();
    for diff in diffs {
        groups.entry(diff.resource.kind).or_default().push(diff);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;
    use crate::resource::{FileParams, PackageParams, ServiceParams};

    #[test]
    fn test_diffs_against_host() {
        let host = MemoryHost::new()
            .with_package("git", "2.43")
            .with_available_package("nginx", "1.24")
            .with_file("/etc/motd", "old");
        let recipe = Recipe::new("base")
            .with_resource(Resource::new(PackageParams::new("git")))
            .with_resource(Resource::new(PackageParams::new("nginx")))
            .with_resource(Resource::new(FileParams::new("/etc/motd", "new")))
            .with_resource(Resource::new(ServiceParams::new("nginx")));

        let diffs = compute_diffs(&[recipe], &host);
        let refs: Vec<String> = diffs.iter().map(|d| d.resource.to_string()).collect();
        assert_eq!(refs, vec!["package[nginx]", "file[/etc/motd]", "service[nginx]"]);

        let summary = DiffSummary::from_diffs(&diffs);
        assert_eq!(summary.additions, 1);
        assert_eq!(summary.modifications, 1);
        assert_eq!(summary.unknown, 1);
        assert!(diffs[2].observe_error.is_some());

        let groups = group_by_kind(&diffs);
        assert_eq!(groups[&ResourceKind::Package].len(), 1);
    }
}
