//! Recipes: ordered lists of resources
//!
//! A recipe file is TOML:
//!
//! ```toml
//! description = "Reverse proxy"
//! depends = ["base"]
//!
//! [[resource]]
//! type = "package"
//! name = "nginx"
//!
//! [[resource]]
//! type = "service"
//! name = "nginx"
//! ```
//!
//! Composition interpolates `${key}` attribute references in every string,
//! builds the typed resources and renders templates. Everything that can be
//! checked without touching the host fails here, before the run applies
//! anything.

use crate::attributes::Attributes;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::report::RunReport;
use crate::resource::{Resource, ResourceRef, ResourceSpec};
use crate::template::TemplateSource;
use serde::Deserialize;
use std::collections::BTreeSet;
use toml::{Table, Value};

/// Static recipe as written on disk, before attributes are applied
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecipeDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Recipes that must run before this one
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default, rename = "resource")]
    pub resources: Vec<Table>,
}

impl RecipeDefinition {
    /// Parse a recipe file; `name` is used when the file doesn't set one
    pub fn parse(name: &str, text: &str) -> Result<Self> {
        let mut def: Self = toml::from_str(text).map_err(|e| Error::InvalidRecipe {
            recipe: name.to_string(),
            reason: e.to_string(),
        })?;
        if def.name.is_empty() {
            def.name = name.to_string();
        }
        Ok(def)
    }
}

/// A composed recipe, ready to converge
#[derive(Debug, Clone, Default)]
pub struct Recipe {
    pub name: String,
    pub description: Option<String>,
    pub depends: Vec<String>,
    pub resources: Vec<Resource>,
}

impl Recipe {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn depends_on(mut self, recipe: impl Into<String>) -> Self {
        self.depends.push(recipe.into());
        self
    }

    /// Build a recipe from its definition and the node's attributes
    pub fn compose(
        def: &RecipeDefinition,
        attrs: &Attributes,
        templates: &dyn TemplateSource,
    ) -> Result<Self> {
        let mut resources = Vec::with_capacity(def.resources.len());
        for (index, table) in def.resources.iter().enumerate() {
            let mut value = Value::Table(table.clone());
            attrs.interpolate(&mut value)?;
            let resource: Resource = value.try_into().map_err(|e: toml::de::Error| {
                Error::InvalidResource {
                    recipe: def.name.clone(),
                    index,
                    reason: e.message().to_string(),
                }
            })?;
            resources.push(resource);
        }

        let mut recipe = Self {
            name: def.name.clone(),
            description: def.description.clone(),
            depends: def.depends.clone(),
            resources,
        };
        recipe.prepare(attrs, templates)?;
        log::debug!(
            "Composed recipe {} ({} resources)",
            recipe.name,
            recipe.resources.len()
        );
        Ok(recipe)
    }

    /// Validate resources and render templates
    ///
    /// `compose` calls this; recipes built in code call it themselves.
    pub fn prepare(&mut self, attrs: &Attributes, templates: &dyn TemplateSource) -> Result<()> {
        let mut seen = BTreeSet::new();
        for (index, resource) in self.resources.iter_mut().enumerate() {
            resource.validate().map_err(|reason| Error::InvalidResource {
                recipe: self.name.clone(),
                index,
                reason,
            })?;

            let reference = resource.reference();
            if !seen.insert(reference.clone()) {
                return Err(Error::DuplicateResource {
                    resource: reference.to_string(),
                });
            }

            match &mut resource.spec {
                ResourceSpec::Template(params) => params.render(attrs, templates)?,
                ResourceSpec::Execute(params) if !params.is_guarded() => {
                    log::warn!("{reference} has no guard and runs on every converge");
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn references(&self) -> impl Iterator<Item = ResourceRef> + '_ {
        self.resources.iter().map(Resource::reference)
    }

    /// Converge just this recipe on a host
    ///
    /// Resources apply in order and the first failure skips the rest.
    pub fn run(&self, host: &dyn Host) -> RunReport {
        Engine::new("local", host).converge(std::slice::from_ref(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeLayer, Precedence};
    use crate::memory::MemoryHost;
    use crate::report::{Outcome, SkipReason};
    use crate::resource::{PackageParams, ResourceKind};
    use crate::template::NoTemplates;
    use std::collections::BTreeMap;

    const MYSQL: &str = r#"
        description = "Database server"

        [[resource]]
        type = "package"
        name = "mysql-server"

        [[resource]]
        type = "database"
        name = "${app.db.name}"

        [resource.connection]
        password = "${mysql.root_password}"
    "#;

    fn attrs() -> Attributes {
        Attributes::new().with_layer(
            AttributeLayer::new("app", Precedence::Default)
                .with("app.db.name", "shop")
                .with("mysql.root_password", "hunter2"),
        )
    }

    #[test]
    fn test_compose_interpolates_attributes() {
        let def = RecipeDefinition::parse("mysql", MYSQL).unwrap();
        let recipe = Recipe::compose(&def, &attrs(), &NoTemplates).unwrap();

        assert_eq!(recipe.name, "mysql");
        assert_eq!(recipe.description.as_deref(), Some("Database server"));
        let refs: Vec<String> = recipe.references().map(|r| r.to_string()).collect();
        assert_eq!(refs, vec!["package[mysql-server]", "database[shop]"]);
        let ResourceSpec::Database(db) = &recipe.resources[1].spec else {
            panic!("expected database resource");
        };
        assert_eq!(db.connection.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_missing_attribute_fails_composition() {
        let def = RecipeDefinition::parse("mysql", MYSQL).unwrap();
        let attrs = Attributes::new().with_layer(
            AttributeLayer::new("app", Precedence::Default).with("app.db.name", "shop"),
        );
        let err = Recipe::compose(&def, &attrs, &NoTemplates).unwrap_err();
        assert_eq!(
            err,
            Error::MissingAttribute {
                key: "mysql.root_password".to_string()
            }
        );
    }

    #[test]
    fn test_bad_resource_reports_index() {
        let def = RecipeDefinition::parse(
            "bad",
            r#"
            [[resource]]
            type = "package"
            name = "git"

            [[resource]]
            type = "service"
            "#,
        )
        .unwrap();
        let err = Recipe::compose(&def, &Attributes::new(), &NoTemplates).unwrap_err();
        assert!(matches!(err, Error::InvalidResource { index: 1, .. }));
    }

    #[test]
    fn test_misspelled_notifies_fails_composition() {
        let def = RecipeDefinition::parse(
            "nginx",
            r#"
            [[resource]]
            type = "file"
            path = "/etc/nginx/nginx.conf"
            content = "worker_processes 2;"
            notify = [{ action = "reload", target = "service[nginx]" }]

            [[resource]]
            type = "service"
            name = "nginx"
            "#,
        )
        .unwrap();
        let err = Recipe::compose(&def, &Attributes::new(), &NoTemplates).unwrap_err();
        match err {
            Error::InvalidResource { index, reason, .. } => {
                assert_eq!(index, 0);
                assert!(reason.contains("notify"), "{reason}");
            }
            other => panic!("expected InvalidResource, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_resource_rejected() {
        let mut recipe = Recipe::new("dup")
            .with_resource(Resource::new(PackageParams::new("git")))
            .with_resource(Resource::new(PackageParams::new("git")));
        let err = recipe.prepare(&Attributes::new(), &NoTemplates).unwrap_err();
        assert_eq!(err.kind(), "duplicate_resource");
    }

    #[test]
    fn test_templates_render_at_compose() {
        let def = RecipeDefinition::parse(
            "motd",
            r#"
            [[resource]]
            type = "template"
            path = "/etc/motd"
            source = "motd.j2"
            "#,
        )
        .unwrap();
        let mut templates = BTreeMap::new();
        templates.insert(
            "motd.j2".to_string(),
            "Welcome to {{ node.app.db.name }}".to_string(),
        );
        let recipe = Recipe::compose(&def, &attrs(), &templates).unwrap();
        let ResourceSpec::Template(tpl) = &recipe.resources[0].spec else {
            panic!("expected template resource");
        };
        assert_eq!(tpl.rendered.as_deref(), Some("Welcome to shop"));
    }

    #[test]
    fn test_invalid_toml() {
        let err = RecipeDefinition::parse("broken", "[[resource").unwrap_err();
        assert_eq!(err.kind(), "invalid_recipe");
    }

    #[test]
    fn test_run_is_fail_fast() {
        let host = MemoryHost::new()
            .with_available_package("a", "1")
            .with_available_package("c", "1");
        let recipe = Recipe::new("abc")
            .with_resource(Resource::new(PackageParams::new("a")))
            .with_resource(Resource::new(PackageParams::new("b")))
            .with_resource(Resource::new(PackageParams::new("c")));

        let report = recipe.run(&host);
        let pkg = |n: &str| ResourceRef::new(ResourceKind::Package, n);
        assert!(report.outcome(&pkg("a")).unwrap().is_converged());
        assert!(report.outcome(&pkg("b")).unwrap().is_failed());
        assert_eq!(
            report.outcome(&pkg("c")),
            Some(&Outcome::skipped(SkipReason::Aborted))
        );
        assert_eq!(
            host.package_version("c", crate::resource::PackageProvider::System)
                .unwrap(),
            None
        );
    }
}
