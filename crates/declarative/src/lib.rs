//! # Declarative
//!
//! Declarative machine provisioning: describe the state a node should be in
//! and converge it there, changing only what differs.
//!
//! ## Core Concepts
//!
//! - **Resource**: One unit of desired state (package, file, template, service, database...)
//! - **Recipe**: An ordered, fail-fast list of resources
//! - **Attributes**: Layered node configuration, `default < role < environment`
//! - **Engine**: Runs recipes, delivers deduplicated notifications, honours a deadline
//! - **Host**: Every observation and mutation goes through it
//!
//! ## Example
//!
//! ```
//! use declarative::{
//!     AttributeLayer, Attributes, Cookbook, Engine, MemoryHost, Precedence, RecipeDefinition,
//! };
//!
//! let recipe = RecipeDefinition::parse(
//!     "motd",
//!     r#"
//!     [[resource]]
//!     type = "file"
//!     path = "/etc/motd"
//!     content = "welcome to ${site.name}"
//!     "#,
//! )
//! .unwrap();
//! let cookbook = Cookbook::new().with_recipe(recipe);
//! let attrs = Attributes::new()
//!     .with_layer(AttributeLayer::new("base", Precedence::Default).with("site.name", "example"));
//!
//! let host = MemoryHost::new().with_dir("/etc");
//! let engine = Engine::new("web1", &host);
//!
//! let first = engine.run(&cookbook, &["motd"], &attrs, &mut declarative::NoProgress);
//! assert_eq!(first.summary().changed(), 1);
//!
//! // A second run finds nothing to do
//! let second = engine.run(&cookbook, &["motd"], &attrs, &mut declarative::NoProgress);
//! assert_eq!(second.summary().changed(), 0);
//! ```
//!
//! ## Provider Traits
//!
//! - [`Host`]: The machine being converged
//! - [`TemplateSource`]: Where template resources find their text
//! - [`ProgressCallback`]: Receives progress updates
//! - [`ConfirmCallback`]: Handles user confirmations
//!
//! This keeps the crate free of any terminal UI or system specifics.

pub mod attributes;
pub mod context;
pub mod cookbook;
pub mod diff;
pub mod engine;
pub mod error;
pub mod fleet;
pub mod graph;
pub mod host;
pub mod memory;
pub mod recipe;
pub mod report;
pub mod resource;
pub mod template;
pub mod types;

// Re-export main types at crate root
pub use attributes::{AttributeLayer, Attributes, Precedence, Resolved};
pub use context::{
    ApplyContext, AutoConfirm, AutoDecline, ConfirmCallback, NoProgress, ProgressCallback,
};
pub use cookbook::Cookbook;
pub use diff::{DiffSummary, ResourceDiff, compute_diffs, group_by_kind};
pub use engine::{Engine, RunOptions};
pub use error::{Error, Result};
pub use fleet::{FleetNode, converge_fleet};
pub use graph::NotificationGraph;
pub use host::{
    CommandOutput, FileKind, FileStat, Host, HostError, HostResult, ServiceAction, ServiceStatus,
};
pub use memory::MemoryHost;
pub use recipe::{Recipe, RecipeDefinition};
pub use report::{
    NotificationReport, Outcome, RecipeReport, ResourceReport, RunReport, RunSummary, SkipReason,
};
pub use resource::{
    Converge, Notification, NotifyAction, Resource, ResourceKind, ResourceRef, ResourceSpec,
};
pub use template::{NoTemplates, TemplateSource};
pub use types::{ApplyResult, Ensure, Mode, ResourceState};
