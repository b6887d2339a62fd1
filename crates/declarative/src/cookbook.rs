//! Cookbook: recipe definitions and templates known to a run
//!
//! Loading from disk is the CLI's job; the cookbook only resolves a run list
//! into dependency order and composes it.

use crate::attributes::Attributes;
use crate::error::{Error, Result};
use crate::recipe::{Recipe, RecipeDefinition};
use crate::template::TemplateSource;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct Cookbook {
    recipes: BTreeMap<String, RecipeDefinition>,
    templates: BTreeMap<String, String>,
}

impl Cookbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_recipe(&mut self, def: RecipeDefinition) {
        self.recipes.insert(def.name.clone(), def);
    }

    pub fn with_recipe(mut self, def: RecipeDefinition) -> Self {
        self.add_recipe(def);
        self
    }

    pub fn add_template(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.templates.insert(name.into(), text.into());
    }

    pub fn with_template(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.add_template(name, text);
        self
    }

    pub fn recipe(&self, name: &str) -> Option<&RecipeDefinition> {
        self.recipes.get(name)
    }

    pub fn recipes(&self) -> impl Iterator<Item = &RecipeDefinition> {
        self.recipes.values()
    }

    pub fn template_names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Expand a run list with dependencies, dependencies first
    ///
    /// Each recipe appears once, at its first required position.
    pub fn resolve_run_list<S: AsRef<str>>(
        &self,
        run_list: &[S],
    ) -> Result<Vec<&RecipeDefinition>> {
        let mut ordered = Vec::new();
        let mut stack = Vec::new();
        for name in run_list {
            self.visit(name.as_ref(), &mut stack, &mut ordered)?;
        }
        Ok(ordered)
    }

    fn visit<'a>(
        &'a self,
        name: &str,
        stack: &mut Vec<String>,
        ordered: &mut Vec<&'a RecipeDefinition>,
    ) -> Result<()> {
        if ordered.iter().any(|d| d.name == name) {
            return Ok(());
        }
        if let Some(pos) = stack.iter().position(|s| s == name) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(name.to_string());
            return Err(Error::InvalidRecipe {
                recipe: name.to_string(),
                reason: format!("dependency cycle: {}", cycle.join(" -> ")),
            });
        }
        let def = self.recipes.get(name).ok_or_else(|| Error::InvalidRecipe {
            recipe: name.to_string(),
            reason: match stack.last() {
                Some(parent) => format!("unknown recipe (required by {parent})"),
                None => "unknown recipe".to_string(),
            },
        })?;

        stack.push(name.to_string());
        for dep in &def.depends {
            self.visit(dep, stack, ordered)?;
        }
        stack.pop();
        ordered.push(def);
        Ok(())
    }

    /// Resolve and compose a run list against node attributes
    pub fn compose<S: AsRef<str>>(
        &self,
        run_list: &[S],
        attrs: &Attributes,
    ) -> Result<Vec<Recipe>> {
        self.resolve_run_list(run_list)?
            .into_iter()
            .map(|def| Recipe::compose(def, attrs, self))
            .collect()
    }
}

impl TemplateSource for Cookbook {
    fn template(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, depends: &[&str]) -> RecipeDefinition {
        RecipeDefinition {
            name: name.to_string(),
            depends: depends.iter().map(ToString::to_string).collect(),
            ..RecipeDefinition::default()
        }
    }

    fn names(defs: &[&RecipeDefinition]) -> Vec<String> {
        defs.iter().map(|d| d.name.clone()).collect()
    }

    #[test]
    fn test_dependencies_come_first() {
        let book = Cookbook::new()
            .with_recipe(def("base", &[]))
            .with_recipe(def("mysql", &["base"]))
            .with_recipe(def("app", &["mysql", "nginx"]))
            .with_recipe(def("nginx", &["base"]));

        let order = book.resolve_run_list(&["app"]).unwrap();
        assert_eq!(names(&order), vec!["base", "mysql", "nginx", "app"]);
    }

    #[test]
    fn test_each_recipe_once() {
        let book = Cookbook::new()
            .with_recipe(def("base", &[]))
            .with_recipe(def("nginx", &["base"]));
        let order = book.resolve_run_list(&["base", "nginx", "base"]).unwrap();
        assert_eq!(names(&order), vec!["base", "nginx"]);
    }

    #[test]
    fn test_unknown_recipe() {
        let book = Cookbook::new().with_recipe(def("app", &["nginx"]));
        let err = book.resolve_run_list(&["app"]).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidRecipe {
                recipe: "nginx".to_string(),
                reason: "unknown recipe (required by app)".to_string()
            }
        );
    }

    #[test]
    fn test_dependency_cycle() {
        let book = Cookbook::new()
            .with_recipe(def("a", &["b"]))
            .with_recipe(def("b", &["a"]));
        let err = book.resolve_run_list(&["a"]).unwrap_err();
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn test_templates_are_a_source() {
        let book = Cookbook::new().with_template("motd.j2", "hi");
        assert_eq!(book.template("motd.j2"), Some("hi"));
        assert_eq!(book.template_names().collect::<Vec<_>>(), vec!["motd.j2"]);
    }
}
