//! Template lookup and rendering
//!
//! Templates are Jinja-style (minijinja). The render context holds the
//! resolved node attributes under `node` plus any per-resource `variables`
//! at the top level. Undefined values are errors rather than empty strings.

use minijinja::{Environment, UndefinedBehavior};
use std::collections::BTreeMap;
use toml::{Table, Value};

/// Where named template sources come from
pub trait TemplateSource {
    fn template(&self, name: &str) -> Option<&str>;
}

impl TemplateSource for BTreeMap<String, String> {
    fn template(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

/// Source with no templates, for recipes that only use inline content
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTemplates;

impl TemplateSource for NoTemplates {
    fn template(&self, _name: &str) -> Option<&str> {
        None
    }
}

/// Render `source` with `node` attributes and extra `variables`
pub fn render(
    name: &str,
    source: &str,
    node: &Table,
    variables: &Table,
) -> std::result::Result<String, String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env.add_template(name, source).map_err(|e| e.to_string())?;
    let template = env.get_template(name).map_err(|e| e.to_string())?;

    let mut context = variables.clone();
    context.insert("node".to_string(), Value::Table(node.clone()));
    template.render(&context).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Table {
        toml::from_str(
            r#"
            [nginx]
            port = 80
            server_name = "example.com"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_render_node_attributes() {
        let out = render(
            "site.conf",
            "listen {{ node.nginx.port }};\nserver_name {{ node.nginx.server_name }};\n",
            &node(),
            &Table::new(),
        )
        .unwrap();
        assert_eq!(out, "listen 80;\nserver_name example.com;\n");
    }

    #[test]
    fn test_variables_are_top_level() {
        let mut vars = Table::new();
        vars.insert("app".into(), Value::String("shop".into()));
        let out = render("t", "app={{ app }}", &node(), &vars).unwrap();
        assert_eq!(out, "app=shop");
    }

    #[test]
    fn test_undefined_is_an_error() {
        let err = render("t", "{{ node.mysql.port }}", &node(), &Table::new()).unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn test_lookup() {
        let mut store = BTreeMap::new();
        store.insert("motd.j2".to_string(), "hi".to_string());
        assert_eq!(store.template("motd.j2"), Some("hi"));
        assert_eq!(NoTemplates.template("motd.j2"), None);
    }
}
