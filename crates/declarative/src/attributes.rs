//! Layered node attributes
//!
//! Attributes are hierarchical TOML tables flattened into dotted keys
//! (`nginx.directories.conf_dir`). Layers are queried from the highest
//! precedence down: `environment` beats `role`, `role` beats `default`.
//! Several layers may share a precedence; the one added last wins.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use toml::{Table, Value};

/// Precedence of an attribute layer, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precedence {
    Default,
    Role,
    Environment,
}

impl fmt::Display for Precedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Role => write!(f, "role"),
            Self::Environment => write!(f, "environment"),
        }
    }
}

/// One named set of attribute values at a given precedence
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeLayer {
    pub name: String,
    pub precedence: Precedence,
    values: BTreeMap<String, Value>,
}

impl AttributeLayer {
    pub fn new(name: impl Into<String>, precedence: Precedence) -> Self {
        Self {
            name: name.into(),
            precedence,
            values: BTreeMap::new(),
        }
    }

    /// Build a layer from a (possibly nested) TOML table
    pub fn from_table(name: impl Into<String>, precedence: Precedence, table: Table) -> Self {
        let mut layer = Self::new(name, precedence);
        for (key, value) in table {
            layer.insert(&key, value);
        }
        layer
    }

    /// Parse a layer from TOML text
    pub fn parse(name: impl Into<String>, precedence: Precedence, text: &str) -> Result<Self> {
        let name = name.into();
        let table: Table = toml::from_str(text).map_err(|e| Error::InvalidAttributes {
            layer: name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_table(name, precedence, table))
    }

    /// Builder-style insert, used mostly when assembling layers in code
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value.into());
        self
    }

    /// Insert a value; nested tables are flattened under `key`
    pub fn insert(&mut self, key: &str, value: Value) {
        match value {
            Value::Table(table) => {
                for (child, value) in table {
                    self.insert(&format!("{key}.{child}"), value);
                }
            }
            other => {
                self.values.insert(key.to_string(), other);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// A resolved value together with the layer that supplied it
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<'a> {
    pub value: &'a Value,
    pub layer: &'a str,
    pub precedence: Precedence,
}

/// Ordered stack of attribute layers
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    layers: Vec<AttributeLayer>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, layer: AttributeLayer) -> Self {
        self.push(layer);
        self
    }

    pub fn push(&mut self, layer: AttributeLayer) {
        log::debug!(
            "Adding {} attribute layer '{}' ({} keys)",
            layer.precedence,
            layer.name,
            layer.len()
        );
        self.layers.push(layer);
    }

    pub fn layers(&self) -> &[AttributeLayer] {
        &self.layers
    }

    /// Layers from highest to lowest precedence
    fn by_precedence(&self) -> impl Iterator<Item = &AttributeLayer> {
        let mut ordered: Vec<(usize, &AttributeLayer)> = self.layers.iter().enumerate().collect();
        ordered.sort_by(|(ia, a), (ib, b)| b.precedence.cmp(&a.precedence).then(ib.cmp(ia)));
        ordered.into_iter().map(|(_, layer)| layer)
    }

    /// Look up a leaf value, reporting which layer supplied it
    pub fn lookup(&self, key: &str) -> Option<Resolved<'_>> {
        self.by_precedence().find_map(|layer| {
            layer.get(key).map(|value| Resolved {
                value,
                layer: &layer.name,
                precedence: layer.precedence,
            })
        })
    }

    /// Resolve a key to a value
    ///
    /// Leaf keys return their value. A key naming an interior node
    /// (`nginx.gzip`) returns the merged subtree as a table.
    pub fn resolve(&self, key: &str) -> Result<Value> {
        if let Some(resolved) = self.lookup(key) {
            return Ok(resolved.value.clone());
        }

        let prefix = format!("{key}.");
        let subtree: BTreeMap<String, Value> = self
            .merged()
            .into_iter()
            .filter_map(|(k, r)| {
                k.strip_prefix(&prefix)
                    .map(|rest| (rest.to_string(), r.value.clone()))
            })
            .collect();

        if subtree.is_empty() {
            return Err(Error::MissingAttribute {
                key: key.to_string(),
            });
        }
        Ok(Value::Table(unflatten(subtree)))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.resolve(key).is_ok()
    }

    /// Every key with its winning value
    pub fn merged(&self) -> BTreeMap<String, Resolved<'_>> {
        let mut merged = BTreeMap::new();
        for layer in self.by_precedence() {
            for (key, value) in &layer.values {
                merged.entry(key.clone()).or_insert(Resolved {
                    value,
                    layer: &layer.name,
                    precedence: layer.precedence,
                });
            }
        }
        merged
    }

    /// The merged attributes as a nested table (used as the `node` template variable)
    pub fn to_tree(&self) -> Table {
        let flat = self
            .merged()
            .into_iter()
            .map(|(k, r)| (k, r.value.clone()))
            .collect();
        unflatten(flat)
    }

    /// Substitute `${key}` references in a string
    ///
    /// A string consisting of exactly one reference takes the referenced
    /// value with its type; otherwise values are spliced in as text.
    /// `$${` escapes a literal `${`.
    pub fn interpolate_str(&self, input: &str) -> Result<Value> {
        if let Some(key) = sole_reference(input) {
            return self.resolve(key);
        }

        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(pos) = rest.find("${") {
            if rest[..pos].ends_with('$') {
                out.push_str(&rest[..pos - 1]);
                out.push_str("${");
                rest = &rest[pos + 2..];
                continue;
            }
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 2..];
            match after.find('}') {
                Some(end) => {
                    let key = after[..end].trim();
                    out.push_str(&splice(&self.resolve(key)?));
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[pos..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        Ok(Value::String(out))
    }

    /// Interpolate every string inside a value tree in place
    pub fn interpolate(&self, value: &mut Value) -> Result<()> {
        match value {
            Value::String(s) if s.contains("${") => {
                *value = self.interpolate_str(s)?;
            }
            Value::Array(items) => {
                for item in items {
                    self.interpolate(item)?;
                }
            }
            Value::Table(table) => {
                for (_, item) in table.iter_mut() {
                    self.interpolate(item)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn sole_reference(input: &str) -> Option<&str> {
    let inner = input.strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains('}') || inner.contains("${") {
        return None;
    }
    Some(inner.trim())
}

fn splice(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Array(items) => items.iter().map(splice).collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}

fn unflatten(flat: BTreeMap<String, Value>) -> Table {
    let mut root = Table::new();
    for (key, value) in flat {
        let parts: Vec<&str> = key.split('.').collect();
        insert_path(&mut root, &parts, value);
    }
    root
}

fn insert_path(table: &mut Table, parts: &[&str], value: Value) {
    match parts {
        [] => {}
        [leaf] => {
            table.insert((*leaf).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = table
                .entry((*head).to_string())
                .or_insert(Value::Table(Table::new()));
            if !entry.is_table() {
                *entry = Value::Table(Table::new());
            }
            if let Value::Table(child) = entry {
                insert_path(child, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layered() -> Attributes {
        Attributes::new()
            .with_layer(
                AttributeLayer::new("default", Precedence::Default)
                    .with("nginx.port", 80)
                    .with("nginx.user", "www-data")
                    .with("db.host", "localhost"),
            )
            .with_layer(AttributeLayer::new("web", Precedence::Role).with("nginx.user", "nginx"))
            .with_layer(
                AttributeLayer::new("production", Precedence::Environment).with("nginx.port", 8080),
            )
    }

    #[test]
    fn test_environment_overrides_default() {
        let attrs = layered();
        assert_eq!(attrs.resolve("nginx.port").unwrap(), Value::Integer(8080));
    }

    #[test]
    fn test_role_overrides_default() {
        let attrs = layered();
        let resolved = attrs.lookup("nginx.user").unwrap();
        assert_eq!(resolved.value.as_str(), Some("nginx"));
        assert_eq!(resolved.layer, "web");
        assert_eq!(resolved.precedence, Precedence::Role);
    }

    #[test]
    fn test_precedence_is_independent_of_insertion_order() {
        let attrs = Attributes::new()
            .with_layer(AttributeLayer::new("prod", Precedence::Environment).with("port", 8080))
            .with_layer(AttributeLayer::new("default", Precedence::Default).with("port", 80));
        assert_eq!(attrs.resolve("port").unwrap(), Value::Integer(8080));
    }

    #[test]
    fn test_later_layer_wins_within_same_precedence() {
        let attrs = Attributes::new()
            .with_layer(AttributeLayer::new("base", Precedence::Role).with("workers", 1))
            .with_layer(AttributeLayer::new("big", Precedence::Role).with("workers", 8));
        assert_eq!(attrs.resolve("workers").unwrap(), Value::Integer(8));
    }

    #[test]
    fn test_missing_attribute() {
        let attrs = layered();
        let err = attrs.resolve("db.password").unwrap_err();
        assert_eq!(
            err,
            Error::MissingAttribute {
                key: "db.password".to_string()
            }
        );
    }

    #[test]
    fn test_nested_tables_are_flattened() {
        let layer = AttributeLayer::parse(
            "default",
            Precedence::Default,
            r#"
            [nginx.directories]
            conf_dir = "/etc/nginx"
            log_dir = "/var/log/nginx"
            "#,
        )
        .unwrap();
        assert_eq!(
            layer.get("nginx.directories.conf_dir").and_then(Value::as_str),
            Some("/etc/nginx")
        );
    }

    #[test]
    fn test_interior_key_resolves_to_subtree() {
        let attrs = layered();
        let nginx = attrs.resolve("nginx").unwrap();
        let table = nginx.as_table().unwrap();
        assert_eq!(table.get("port"), Some(&Value::Integer(8080)));
        assert_eq!(table.get("user").and_then(Value::as_str), Some("nginx"));
    }

    #[test]
    fn test_interpolate_keeps_type_for_sole_reference() {
        let attrs = layered();
        assert_eq!(
            attrs.interpolate_str("${nginx.port}").unwrap(),
            Value::Integer(8080)
        );
    }

    #[test]
    fn test_interpolate_splices_into_text() {
        let attrs = layered();
        assert_eq!(
            attrs
                .interpolate_str("listen ${nginx.port}; user ${ nginx.user };")
                .unwrap(),
            Value::String("listen 8080; user nginx;".to_string())
        );
    }

    #[test]
    fn test_interpolate_escape() {
        let attrs = layered();
        assert_eq!(
            attrs.interpolate_str("cost $${HOME} at ${db.host}").unwrap(),
            Value::String("cost ${HOME} at localhost".to_string())
        );
    }

    #[test]
    fn test_interpolate_tree_reports_missing_key() {
        let attrs = layered();
        let mut value: Value = toml::from_str::<Table>(
            r#"
            password = "${db.password}"
            "#,
        )
        .map(Value::Table)
        .unwrap();
        let err = attrs.interpolate(&mut value).unwrap_err();
        assert!(matches!(err, Error::MissingAttribute { key } if key == "db.password"));
    }

    #[test]
    fn test_to_tree_nests_merged_values() {
        let tree = layered().to_tree();
        let nginx = tree.get("nginx").and_then(Value::as_table).unwrap();
        assert_eq!(nginx.get("port"), Some(&Value::Integer(8080)));
        let db = tree.get("db").and_then(Value::as_table).unwrap();
        assert_eq!(db.get("host").and_then(Value::as_str), Some("localhost"));
    }
}
