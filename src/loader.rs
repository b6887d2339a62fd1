//! Loading a cookbook directory
//!
//! ```text
//! <cookbook>/recipes/<name>.toml
//! <cookbook>/attributes/*.toml        default layer, in file name order
//! <cookbook>/roles/<role>.toml
//! <cookbook>/environments/<env>.toml
//! <cookbook>/templates/**             referenced by path relative to templates/
//! ```

use anyhow::{Context, Result, bail};
use declarative::{AttributeLayer, Attributes, Cookbook, Precedence, RecipeDefinition};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Read every recipe and template under `dir`
pub fn load_cookbook(dir: &Path) -> Result<Cookbook> {
    if !dir.is_dir() {
        bail!("Cookbook directory not found: {}", dir.display());
    }

    let mut cookbook = Cookbook::new();

    for path in toml_files(&dir.join("recipes"))? {
        let name = stem(&path)?;
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let def = RecipeDefinition::parse(&name, &text)
            .with_context(|| format!("Invalid recipe file: {}", path.display()))?;
        log::debug!("Loaded recipe {name} ({} resources)", def.resources.len());
        cookbook.add_recipe(def);
    }

    let templates = dir.join("templates");
    if templates.is_dir() {
        for entry in WalkDir::new(&templates).sort_by_file_name() {
            let entry = entry
                .with_context(|| format!("Could not walk {}", templates.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&templates)
                .with_context(|| format!("Unexpected path {}", entry.path().display()))?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let text = fs::read_to_string(entry.path())
                .with_context(|| format!("Could not read {}", entry.path().display()))?;
            log::debug!("Loaded template {name}");
            cookbook.add_template(name, text);
        }
    }

    Ok(cookbook)
}

/// Build the node's attribute layers: defaults, then roles, then the environment
pub fn load_attributes(
    dir: &Path,
    roles: &[String],
    environment: Option<&str>,
) -> Result<Attributes> {
    let mut attrs = Attributes::new();

    for path in toml_files(&dir.join("attributes"))? {
        let name = format!("attributes/{}", stem(&path)?);
        attrs.push(read_layer(&path, name, Precedence::Default)?);
    }

    for role in roles {
        let path = dir.join("roles").join(format!("{role}.toml"));
        if !path.is_file() {
            bail!("Unknown role '{role}': {} does not exist", path.display());
        }
        attrs.push(read_layer(&path, format!("role[{role}]"), Precedence::Role)?);
    }

    if let Some(env) = environment {
        let path = dir.join("environments").join(format!("{env}.toml"));
        if !path.is_file() {
            bail!("Unknown environment '{env}': {} does not exist", path.display());
        }
        attrs.push(read_layer(
            &path,
            format!("environment[{env}]"),
            Precedence::Environment,
        )?);
    }

    Ok(attrs)
}

/// Names of roles or environments available in the cookbook
pub fn available(dir: &Path, kind: &str) -> Result<Vec<String>> {
    toml_files(&dir.join(kind))?
        .iter()
        .map(|p| stem(p))
        .collect()
}

fn read_layer(path: &Path, name: String, precedence: Precedence) -> Result<AttributeLayer> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    AttributeLayer::parse(name, precedence, &text)
        .with_context(|| format!("Invalid attribute file: {}", path.display()))
}

/// `*.toml` files directly inside `dir`, sorted by name; none if `dir` is missing
fn toml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("Could not read {}", dir.display()))?;
        if entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == "toml")
        {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn stem(path: &Path) -> Result<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .with_context(|| format!("Invalid file name: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn sample() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(
            root,
            "recipes/nginx.toml",
            r#"
depends = ["base"]

[[resource]]
type = "package"
name = "nginx"

[[resource]]
type = "template"
path = "/etc/nginx/nginx.conf"
source = "nginx/nginx.conf.j2"
notifies = [{ action = "reload", target = "service[nginx]" }]

[[resource]]
type = "service"
name = "nginx"
"#,
        );
        write(
            root,
            "recipes/base.toml",
            "[[resource]]\ntype = \"package\"\nname = \"curl\"\n",
        );
        write(root, "recipes/README.md", "not a recipe");
        write(
            root,
            "templates/nginx/nginx.conf.j2",
            "worker_processes {{ node.nginx.workers }};\n",
        );
        write(root, "attributes/00-base.toml", "[nginx]\nworkers = 1\nport = 80\n");
        write(root, "attributes/10-nginx.toml", "[nginx]\nworkers = 2\n");
        write(root, "roles/web.toml", "[nginx]\nworkers = 4\n");
        write(root, "environments/production.toml", "[nginx]\nworkers = 8\n");
        dir
    }

    #[test]
    fn test_load_cookbook() {
        let dir = sample();
        let cookbook = load_cookbook(dir.path()).unwrap();

        let names: Vec<_> = cookbook.recipes().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["base", "nginx"]);
        assert_eq!(cookbook.recipe("nginx").unwrap().depends, vec!["base"]);
        assert_eq!(
            cookbook.template_names().collect::<Vec<_>>(),
            vec!["nginx/nginx.conf.j2"]
        );
    }

    #[test]
    fn test_missing_cookbook() {
        let dir = TempDir::new().unwrap();
        let err = load_cookbook(&dir.path().join("nope")).unwrap_err();
        assert!(err.to_string().contains("Cookbook directory not found"));
    }

    #[test]
    fn test_attribute_precedence_from_files() {
        let dir = sample();
        let root = dir.path();

        let attrs = load_attributes(root, &[], None).unwrap();
        assert_eq!(attrs.resolve("nginx.workers").unwrap().as_integer(), Some(2));

        let attrs = load_attributes(root, &["web".to_string()], None).unwrap();
        assert_eq!(attrs.resolve("nginx.workers").unwrap().as_integer(), Some(4));

        let attrs = load_attributes(root, &["web".to_string()], Some("production")).unwrap();
        assert_eq!(attrs.resolve("nginx.workers").unwrap().as_integer(), Some(8));
        assert_eq!(attrs.resolve("nginx.port").unwrap().as_integer(), Some(80));
    }

    #[test]
    fn test_unknown_role() {
        let dir = sample();
        let err = load_attributes(dir.path(), &["db".to_string()], None).unwrap_err();
        assert!(err.to_string().contains("Unknown role 'db'"));
    }

    #[test]
    fn test_available() {
        let dir = sample();
        assert_eq!(available(dir.path(), "roles").unwrap(), vec!["web"]);
        assert!(available(dir.path(), "nothing").unwrap().is_empty());
    }
}
