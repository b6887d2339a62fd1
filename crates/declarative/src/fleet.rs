//! Converging several independent nodes in parallel
//!
//! Each node gets its own engine and host; nothing mutable is shared, so the
//! only coordination is the worker pool.

use crate::attributes::Attributes;
use crate::context::NoProgress;
use crate::cookbook::Cookbook;
use crate::engine::{Engine, RunOptions};
use crate::error::{Error, Result};
use crate::host::Host;
use crate::report::RunReport;
use rayon::prelude::*;

/// One machine to converge
pub struct FleetNode<'a> {
    pub name: String,
    pub host: &'a dyn Host,
    pub attrs: Attributes,
    pub run_list: Vec<String>,
}

impl<'a> FleetNode<'a> {
    pub fn new(name: impl Into<String>, host: &'a dyn Host, attrs: Attributes) -> Self {
        Self {
            name: name.into(),
            host,
            attrs,
            run_list: Vec::new(),
        }
    }

    pub fn run_list<I, S>(mut self, recipes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_list = recipes.into_iter().map(Into::into).collect();
        self
    }
}

/// Converge every node, at most `jobs` at a time
///
/// Reports come back in the order of `nodes`.
pub fn converge_fleet(
    nodes: &[FleetNode<'_>],
    cookbook: &Cookbook,
    options: RunOptions,
    jobs: usize,
) -> Result<Vec<RunReport>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
        .map_err(|e| Error::WorkerPool {
            reason: e.to_string(),
        })?;

    log::info!("Converging {} nodes with {} workers", nodes.len(), jobs.max(1));
    Ok(pool.install(|| {
        nodes
            .par_iter()
            .map(|node| {
                Engine::new(node.name.clone(), node.host)
                    .with_options(options)
                    .run(cookbook, &node.run_list, &node.attrs, &mut NoProgress)
            })
            .collect()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeLayer, Precedence};
    use crate::memory::MemoryHost;
    use crate::recipe::RecipeDefinition;

    fn cookbook() -> Cookbook {
        Cookbook::new().with_recipe(
            RecipeDefinition::parse(
                "motd",
                r#"
                [[resource]]
                type = "file"
                path = "/etc/motd"
                content = "node ${node.name}"
                "#,
            )
            .unwrap(),
        )
    }

    fn attrs(name: &str) -> Attributes {
        Attributes::new()
            .with_layer(AttributeLayer::new(name, Precedence::Role).with("node.name", name))
    }

    #[test]
    fn test_nodes_converge_independently() {
        let web = MemoryHost::new().with_dir("/etc");
        let db = MemoryHost::new().with_dir("/etc");
        let nodes = vec![
            FleetNode::new("web1", &web, attrs("web1")).run_list(["motd"]),
            FleetNode::new("db1", &db, attrs("db1")).run_list(["motd"]),
        ];

        let reports = converge_fleet(&nodes, &cookbook(), RunOptions::default(), 2).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].node, "web1");
        assert_eq!(reports[1].node, "db1");
        assert!(reports.iter().all(RunReport::is_success));
        assert_eq!(web.file_content("/etc/motd").as_deref(), Some("node web1"));
        assert_eq!(db.file_content("/etc/motd").as_deref(), Some("node db1"));
    }

    #[test]
    fn test_one_failing_node_does_not_affect_others() {
        let good = MemoryHost::new().with_dir("/etc");
        let bad = MemoryHost::new();
        let nodes = vec![
            FleetNode::new("good", &good, attrs("good")).run_list(["motd"]),
            FleetNode::new("bad", &bad, attrs("bad")).run_list(["motd"]),
        ];

        let reports = converge_fleet(&nodes, &cookbook(), RunOptions::default(), 0).unwrap();
        assert!(reports[0].is_success());
        assert!(!reports[1].is_success());
    }
}
