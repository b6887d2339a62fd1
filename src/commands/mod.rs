pub mod converge;
pub mod inspect;
pub mod status;

use anyhow::{Context as AnyhowContext, Result, bail};
use declarative::{Attributes, Cookbook};
use std::path::{Path, PathBuf};

use crate::Context;
use crate::config::{self, Config};
use crate::loader;

/// Everything a command needs: the loaded cookbook and this node's attributes
pub struct Session {
    pub config: Config,
    pub cookbook_dir: PathBuf,
    pub cookbook: Cookbook,
    pub attrs: Attributes,
    pub roles: Vec<String>,
    pub environment: Option<String>,
    pub node: String,
}

impl Session {
    pub fn open(ctx: &Context) -> Result<Self> {
        Self::from_parts(ctx, Config::load()?)
    }

    /// Command-line flags win over the config file
    pub fn from_parts(ctx: &Context, config: Config) -> Result<Self> {
        let cookbook_dir = ctx
            .cookbook
            .clone()
            .or_else(|| config.cookbook_dir())
            .or_else(|| Path::new("recipes").is_dir().then(|| PathBuf::from(".")))
            .context(
                "No cookbook given: pass --cookbook, set COZINHA_COOKBOOK, or set `cookbook` in config.toml",
            )?;
        let roles = if ctx.roles.is_empty() {
            config.roles.clone()
        } else {
            ctx.roles.clone()
        };
        let environment = ctx.environment.clone().or_else(|| config.environment.clone());
        let node = ctx
            .node
            .clone()
            .or_else(|| config.node.clone())
            .unwrap_or_else(config::hostname);

        log::info!("Loading cookbook from {}", cookbook_dir.display());
        let cookbook = loader::load_cookbook(&cookbook_dir)?;
        let attrs = loader::load_attributes(&cookbook_dir, &roles, environment.as_deref())?;

        Ok(Self {
            config,
            cookbook_dir,
            cookbook,
            attrs,
            roles,
            environment,
            node,
        })
    }

    /// Requested recipes, or the configured run list
    pub fn run_list(&self, requested: &[String]) -> Result<Vec<String>> {
        if !requested.is_empty() {
            return Ok(requested.to_vec());
        }
        if self.config.run_list.is_empty() {
            bail!("No recipes given and no run_list in config.toml");
        }
        Ok(self.config.run_list.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn cookbook() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("recipes")).unwrap();
        fs::create_dir_all(root.join("roles")).unwrap();
        fs::create_dir_all(root.join("attributes")).unwrap();
        fs::write(
            root.join("recipes/motd.toml"),
            "[[resource]]\ntype = \"file\"\npath = \"/etc/motd\"\ncontent = \"${motd.text}\"\n",
        )
        .unwrap();
        fs::write(root.join("attributes/default.toml"), "[motd]\ntext = \"hi\"\n").unwrap();
        fs::write(root.join("roles/web.toml"), "[motd]\ntext = \"web\"\n").unwrap();
        dir
    }

    fn ctx(cookbook: &Path) -> Context {
        Context {
            verbose: 0,
            quiet: true,
            cookbook: Some(cookbook.to_path_buf()),
            roles: Vec::new(),
            environment: None,
            node: Some("test-node".to_string()),
        }
    }

    #[test]
    fn test_flags_override_config() {
        let dir = cookbook();
        let mut ctx = ctx(dir.path());
        ctx.roles = vec!["web".to_string()];
        let config = Config {
            roles: vec!["db".to_string()],
            node: Some("from-config".to_string()),
            ..Config::default()
        };

        let session = Session::from_parts(&ctx, config).unwrap();
        assert_eq!(session.roles, vec!["web"]);
        assert_eq!(session.node, "test-node");
        assert_eq!(
            session.attrs.resolve("motd.text").unwrap().as_str(),
            Some("web")
        );
    }

    #[test]
    fn test_config_supplies_defaults() {
        let dir = cookbook();
        let mut ctx = ctx(dir.path());
        ctx.cookbook = None;
        ctx.node = None;
        let config = Config {
            cookbook: Some(dir.path().display().to_string()),
            roles: vec!["web".to_string()],
            node: Some("from-config".to_string()),
            run_list: vec!["motd".to_string()],
            ..Config::default()
        };

        let session = Session::from_parts(&ctx, config).unwrap();
        assert_eq!(session.node, "from-config");
        assert_eq!(session.run_list(&[]).unwrap(), vec!["motd"]);
        assert_eq!(
            session.run_list(&["other".to_string()]).unwrap(),
            vec!["other"]
        );
    }

    #[test]
    fn test_empty_run_list_is_an_error() {
        let dir = cookbook();
        let session = Session::from_parts(&ctx(dir.path()), Config::default()).unwrap();
        assert!(session.run_list(&[]).is_err());
    }
}
