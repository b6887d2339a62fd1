//! `attrs`, `validate` and `list`

use anyhow::Result;
use colored::Colorize;
use declarative::{Attributes, Cookbook, NotificationGraph};

use super::Session;
use crate::Context;
use crate::loader;
use crate::ui;

/// Print resolved attributes with the layer each value comes from
pub fn attrs(ctx: &Context, key: Option<&str>) -> Result<()> {
    let session = Session::open(ctx)?;
    let lines = attribute_lines(&session.attrs, key)?;

    ui::header(&format!("Attributes for {}", session.node));
    if !session.roles.is_empty() {
        ui::kv("roles", &session.roles.join(", "));
    }
    if let Some(env) = &session.environment {
        ui::kv("environment", env);
    }
    println!();
    for (key, value, source) in lines {
        println!("  {} = {}  {}", key.bold(), value, source.dimmed());
    }
    Ok(())
}

/// `(key, value, layer)` rows, optionally restricted to one key or subtree
fn attribute_lines(
    attrs: &Attributes,
    key: Option<&str>,
) -> Result<Vec<(String, String, String)>> {
    let rows: Vec<_> = attrs
        .merged()
        .into_iter()
        .filter(|(k, _)| {
            key.is_none_or(|wanted| k == wanted || k.starts_with(&format!("{wanted}.")))
        })
        .map(|(k, resolved)| {
            (
                k,
                resolved.value.to_string(),
                format!("({} {})", resolved.precedence, resolved.layer),
            )
        })
        .collect();

    if rows.is_empty()
        && let Some(key) = key
    {
        // Surfaces the same MissingAttribute error a recipe would hit
        attrs.resolve(key)?;
    }
    Ok(rows)
}

/// Compose every recipe and check its notification graph
///
/// Returns the process exit status.
pub fn validate(ctx: &Context) -> Result<i32> {
    let session = Session::open(ctx)?;
    ui::header("Validating cookbook");

    let problems = check_cookbook(&session.cookbook, &session.attrs);
    for def in session.cookbook.recipes() {
        match problems.iter().find(|(name, _)| name == &def.name) {
            Some((_, problem)) => println!("  {} {} {}", "✗".red(), def.name.bold(), problem),
            None => println!(
                "  {} {} {}",
                "✓".green(),
                def.name,
                format!("({} resources)", def.resources.len()).dimmed()
            ),
        }
    }

    println!();
    if problems.is_empty() {
        ui::success("Cookbook is valid");
        Ok(0)
    } else {
        ui::error(&format!("{} recipes have problems", problems.len()));
        Ok(1)
    }
}

/// `(recipe, problem)` for every recipe that doesn't compose cleanly
fn check_cookbook(cookbook: &Cookbook, attrs: &Attributes) -> Vec<(String, String)> {
    cookbook
        .recipes()
        .filter_map(|def| {
            let result = cookbook
                .compose(&[def.name.as_str()], attrs)
                .and_then(|recipes| NotificationGraph::build(&recipes).map(drop));
            result.err().map(|e| (def.name.clone(), e.to_string()))
        })
        .collect()
}

/// List recipes, roles, environments and templates
pub fn list(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let cookbook = &session.cookbook;
    ui::header(&format!("Cookbook {}", session.cookbook_dir.display()));

    ui::section("Recipes");
    for def in cookbook.recipes() {
        let mut line = format!("  {:<24}", def.name);
        if let Some(description) = &def.description {
            line.push_str(description);
        }
        println!("{line}");
        if !def.depends.is_empty() {
            ui::dim(&format!("  depends on {}", def.depends.join(", ")));
        }
    }

    for (title, dir) in [("Roles", "roles"), ("Environments", "environments")] {
        let names = loader::available(&session.cookbook_dir, dir)?;
        if !names.is_empty() {
            ui::section(title);
            for name in names {
                println!("  {name}");
            }
        }
    }

    let templates: Vec<&str> = cookbook.template_names().collect();
    if !templates.is_empty() {
        ui::section("Templates");
        for name in templates {
            println!("  {name}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{AttributeLayer, Precedence, RecipeDefinition};

    fn attrs() -> Attributes {
        Attributes::new()
            .with_layer(
                AttributeLayer::new("base", Precedence::Default)
                    .with("nginx.port", 80)
                    .with("nginx.gzip.level", 5),
            )
            .with_layer(AttributeLayer::new("web", Precedence::Role).with("nginx.port", 8080))
    }

    #[test]
    fn test_attribute_lines_show_winning_layer() {
        let rows = attribute_lines(&attrs(), Some("nginx.port")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, "8080");
        assert!(rows[0].2.contains("web"));
    }

    #[test]
    fn test_attribute_lines_subtree() {
        let rows = attribute_lines(&attrs(), Some("nginx")).unwrap();
        let keys: Vec<_> = rows.iter().map(|r| r.0.as_str()).collect();
        assert_eq!(keys, vec!["nginx.gzip.level", "nginx.port"]);
    }

    #[test]
    fn test_attribute_lines_missing_key() {
        let err = attribute_lines(&attrs(), Some("mysql.port")).unwrap_err();
        assert!(err.to_string().contains("mysql.port"));
    }

    #[test]
    fn test_check_cookbook_reports_bad_recipes() {
        let good = RecipeDefinition::parse(
            "good",
            "[[resource]]\ntype = \"service\"\nname = \"nginx\"\n",
        )
        .unwrap();
        let bad = RecipeDefinition::parse(
            "bad",
            r#"
[[resource]]
type = "file"
path = "/etc/app.conf"
content = "port ${app.port}"
"#,
        )
        .unwrap();
        let cookbook = Cookbook::new().with_recipe(good).with_recipe(bad);

        let problems = check_cookbook(&cookbook, &attrs());
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].0, "bad");
        assert!(problems[0].1.contains("app.port"));
    }
}
