//! Template resource: a file whose content is rendered from node attributes

use serde::Deserialize;
use std::path::PathBuf;
use toml::Table;

use super::file::ManagedFile;
use super::{ApplyContext, Converge, ResourceKind};
use crate::attributes::Attributes;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::template::{self, TemplateSource};
use crate::types::{ApplyResult, Ensure, Mode, ResourceState};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateParams {
    pub path: PathBuf,
    /// Name of a template in the cookbook's template directory
    #[serde(default)]
    pub source: Option<String>,
    /// Inline template text, used instead of `source`
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub variables: Table,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub state: Ensure,
    #[serde(skip)]
    pub rendered: Option<String>,
}

impl TemplateParams {
    pub fn new(path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source: Some(source.into()),
            content: None,
            variables: Table::new(),
            owner: None,
            group: None,
            mode: None,
            state: Ensure::Present,
            rendered: None,
        }
    }

    pub fn inline(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            source: None,
            content: Some(content.into()),
            ..Self::new(path, "")
        }
    }

    pub fn variable(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<String>, group: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self.group = Some(group.into());
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(Mode(mode));
        self
    }

    /// Render the template against resolved attributes
    ///
    /// Runs at compose time so a missing attribute or broken template stops
    /// the run before anything is applied.
    pub fn render(&mut self, attrs: &Attributes, templates: &dyn TemplateSource) -> Result<()> {
        let reference = self.reference().to_string();
        let (name, text) = match (&self.content, &self.source) {
            (Some(inline), _) => ("inline".to_string(), inline.as_str()),
            (None, Some(source)) => {
                let text = templates.template(source).ok_or_else(|| Error::Template {
                    resource: reference.clone(),
                    reason: format!("template '{source}' not found"),
                })?;
                (source.clone(), text)
            }
            (None, None) => {
                return Err(Error::Template {
                    resource: reference,
                    reason: "neither source nor content given".to_string(),
                });
            }
        };

        let rendered = template::render(&name, text, &attrs.to_tree(), &self.variables)
            .map_err(|reason| Error::Template {
                resource: reference,
                reason,
            })?;
        self.rendered = Some(rendered);
        Ok(())
    }

    fn managed(&self) -> Result<ManagedFile<'_>> {
        let content = self.rendered.as_deref().ok_or_else(|| Error::Template {
            resource: self.reference().to_string(),
            reason: "template has not been rendered".to_string(),
        })?;
        Ok(ManagedFile {
            path: &self.path,
            content: content.as_bytes(),
            owner: self.owner.as_deref(),
            group: self.group.as_deref(),
            mode: self.mode,
        })
    }
}

impl Converge for TemplateParams {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Template
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn description(&self) -> String {
        match (&self.state, &self.source) {
            (Ensure::Absent, _) => format!("Remove {}", self.path.display()),
            (Ensure::Present, Some(source)) if self.content.is_none() => {
                format!("Render {} from {}", self.path.display(), source)
            }
            (Ensure::Present, _) => format!("Render {}", self.path.display()),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.state == Ensure::Present && self.source.is_none() && self.content.is_none() {
            return Err("template needs a source or inline content".to_string());
        }
        Ok(())
    }

    fn current_state(&self, host: &dyn Host) -> Result<ResourceState> {
        let managed = self.managed()?;
        match self.state {
            Ensure::Present => managed.observe(host),
            Ensure::Absent => managed.observe_presence(host),
        }
        .map_err(|e| e.at(self.reference()))
    }

    fn desired_state(&self) -> ResourceState {
        match (self.state, self.managed()) {
            (Ensure::Absent, _) => ResourceState::Absent,
            (Ensure::Present, Ok(managed)) => managed.desired(),
            (Ensure::Present, Err(_)) => ResourceState::Unknown,
        }
    }

    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<ApplyResult> {
        let managed = self.managed()?;
        match self.state {
            Ensure::Present => managed.converge(ctx.host),
            Ensure::Absent => managed.remove(ctx.host),
        }
        .map_err(|e| e.at(self.reference()))
    }
}
