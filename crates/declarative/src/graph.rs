//! Notification graph
//!
//! Directed graph over every resource of a run, one edge per `notifies`
//! entry. Built once after composition; rejects unknown targets, actions the
//! target can't perform, and cycles.

use crate::error::{Error, Result};
use crate::recipe::Recipe;
use crate::resource::{Notification, ResourceRef};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct NotificationGraph {
    edges: BTreeMap<ResourceRef, Vec<Notification>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl NotificationGraph {
    /// Build and check the graph for a set of composed recipes
    pub fn build(recipes: &[Recipe]) -> Result<Self> {
        let mut known = BTreeMap::new();
        for recipe in recipes {
            for resource in &recipe.resources {
                if known.insert(resource.reference(), resource).is_some() {
                    return Err(Error::DuplicateResource {
                        resource: resource.reference().to_string(),
                    });
                }
            }
        }

        let mut edges: BTreeMap<ResourceRef, Vec<Notification>> = BTreeMap::new();
        for recipe in recipes {
            for (index, resource) in recipe.resources.iter().enumerate() {
                let source = resource.reference();
                for notification in &resource.notifies {
                    let Some(target) = known.get(&notification.target) else {
                        return Err(Error::UnknownNotificationTarget {
                            source_ref: source.to_string(),
                            target: notification.target.to_string(),
                        });
                    };
                    if !target.supports(notification.action) {
                        return Err(Error::InvalidResource {
                            recipe: recipe.name.clone(),
                            index,
                            reason: format!(
                                "{} cannot {}",
                                notification.target, notification.action
                            ),
                        });
                    }
                    edges
                        .entry(source.clone())
                        .or_default()
                        .push(notification.clone());
                }
            }
        }

        let graph = Self { edges };
        if let Some(cycle) = graph.find_cycle() {
            return Err(Error::NotificationCycle {
                cycle: cycle.iter().map(ToString::to_string).collect(),
            });
        }
        log::debug!("Notification graph: {} edges", graph.edge_count());
        Ok(graph)
    }

    /// Notifications a resource sends when it changes
    pub fn notifications(&self, source: &ResourceRef) -> &[Notification] {
        self.edges.get(source).map_or(&[], Vec::as_slice)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Resources that notify `target`
    pub fn notifiers(&self, target: &ResourceRef) -> BTreeSet<&ResourceRef> {
        self.edges
            .iter()
            .filter(|(_, out)| out.iter().any(|n| &n.target == target))
            .map(|(source, _)| source)
            .collect()
    }

    /// First cycle found, as a path that starts and ends on the same node
    pub fn find_cycle(&self) -> Option<Vec<ResourceRef>> {
        let mut marks: BTreeMap<&ResourceRef, Mark> = BTreeMap::new();
        let mut path: Vec<&ResourceRef> = Vec::new();

        for start in self.edges.keys() {
            if marks.contains_key(start) {
                continue;
            }
            if let Some(cycle) = self.visit(start, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        node: &'a ResourceRef,
        marks: &mut BTreeMap<&'a ResourceRef, Mark>,
        path: &mut Vec<&'a ResourceRef>,
    ) -> Option<Vec<ResourceRef>> {
        marks.insert(node, Mark::Visiting);
        path.push(node);

        for next in self.notifications(node).iter().map(|n| &n.target) {
            match marks.get(next).copied() {
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|p| *p == next).unwrap_or(0);
                    let mut cycle: Vec<ResourceRef> =
                        path[start..].iter().map(|r| (*r).clone()).collect();
                    cycle.push(next.clone());
                    return Some(cycle);
                }
                Some(Mark::Done) => {}
                None => {
                    if let Some(cycle) = self.visit(next, marks, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        marks.insert(node, Mark::Done);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{
        FileParams, NotifyAction, PackageParams, Resource, ResourceKind, ServiceParams,
    };

    fn svc(name: &str) -> ResourceRef {
        ResourceRef::new(ResourceKind::Service, name)
    }

    #[test]
    fn test_valid_graph() {
        let recipe = Recipe::new("nginx")
            .with_resource(Resource::new(PackageParams::new("nginx")))
            .with_resource(
                Resource::new(FileParams::new("/etc/nginx/nginx.conf", ""))
                    .notify(NotifyAction::Reload, svc("nginx")),
            )
            .with_resource(Resource::new(ServiceParams::new("nginx")));

        let graph = NotificationGraph::build(&[recipe]).unwrap();
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.notifiers(&svc("nginx")).len(), 1);
    }

    #[test]
    fn test_two_services_notifying_each_other_is_a_cycle() {
        let recipe = Recipe::new("loop")
            .with_resource(
                Resource::new(ServiceParams::new("a")).notify(NotifyAction::Restart, svc("b")),
            )
            .with_resource(
                Resource::new(ServiceParams::new("b")).notify(NotifyAction::Restart, svc("a")),
            );

        let err = NotificationGraph::build(&[recipe]).unwrap_err();
        let Error::NotificationCycle { cycle } = err else {
            panic!("expected a notification cycle");
        };
        assert_eq!(cycle, vec!["service[a]", "service[b]", "service[a]"]);
    }

    #[test]
    fn test_self_notification_is_a_cycle() {
        let recipe = Recipe::new("self").with_resource(
            Resource::new(ServiceParams::new("a")).notify(NotifyAction::Reload, svc("a")),
        );
        assert_eq!(
            NotificationGraph::build(&[recipe]).unwrap_err().kind(),
            "notification_cycle"
        );
    }

    #[test]
    fn test_unknown_target() {
        let recipe = Recipe::new("nginx").with_resource(
            Resource::new(FileParams::new("/etc/nginx/nginx.conf", ""))
                .notify(NotifyAction::Reload, svc("nginx")),
        );
        assert_eq!(
            NotificationGraph::build(&[recipe]).unwrap_err().kind(),
            "unknown_notification_target"
        );
    }

    #[test]
    fn test_unsupported_action() {
        let recipe = Recipe::new("nginx")
            .with_resource(Resource::new(PackageParams::new("nginx")))
            .with_resource(Resource::new(FileParams::new("/etc/x", "")).notify(
                NotifyAction::Reload,
                ResourceRef::new(ResourceKind::Package, "nginx"),
            ));
        assert_eq!(
            NotificationGraph::build(&[recipe]).unwrap_err().kind(),
            "invalid_resource"
        );
    }

    #[test]
    fn test_duplicate_across_recipes() {
        let a = Recipe::new("a").with_resource(Resource::new(PackageParams::new("git")));
        let b = Recipe::new("b").with_resource(Resource::new(PackageParams::new("git")));
        assert_eq!(
            NotificationGraph::build(&[a, b]).unwrap_err().kind(),
            "duplicate_resource"
        );
    }
}
