//! # Override Resolver
//!
//! Merges a capability document with environment overrides. Every leaf of the
//! document has an *override path* built from the keys (and array indices) that
//! lead to it, e.g. `{"hostMachines": [{"appiumPort": 4723}]}` gives the leaf the
//! lookup name `atd_hostMachines_0_appiumPort`. When the lookup yields a value it
//! replaces the leaf; otherwise the leaf keeps its source value rendered as text.
//!
//! The resolved tree always has the shape of the source. Only leaf values change.

use crate::constants::{OVERRIDE_PREFIX, PATH_SEPARATOR};
use crate::core::settings::unicode_vars;
use crate::models::{ConfigMap, ConfigTree};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// The structural position of a node, used to derive its environment lookup name.
///
/// Paths are immutable: extending one returns a new path, so sibling nodes can
/// never observe segments pushed while resolving each other's subtrees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverridePath {
    segments: Vec<String>,
}

impl OverridePath {
    /// The empty path at the document root.
    pub fn root() -> Self {
        Self::default()
    }

    /// This path extended by a key.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// This path extended by an array position.
    pub fn index(&self, index: usize) -> Self {
        self.child(index.to_string())
    }

    /// Keys and indices from the root, in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The environment variable name for this path, e.g. `atd_a_b`.
    pub fn lookup_name(&self) -> String {
        let mut name = String::with_capacity(
            OVERRIDE_PREFIX.len() + self.segments.iter().map(|s| s.len() + 1).sum::<usize>(),
        );
        name.push_str(OVERRIDE_PREFIX);
        for segment in &self.segments {
            name.push_str(PATH_SEPARATOR);
            name.push_str(segment);
        }
        name
    }
}

/// Every environment variable whose name starts with the override tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    vars: HashMap<String, String>,
}

impl EnvOverrides {
    /// Collects the `atd*` variables of the current process. Variables that are
    /// not valid Unicode are ignored.
    pub fn from_env() -> Self {
        Self::from_vars(unicode_vars(std::env::vars_os()))
    }

    /// Keeps only the variables carrying the override tag.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k.starts_with(OVERRIDE_PREFIX))
            .collect();
        Self { vars }
    }

    /// Exact, case-sensitive lookup.
    pub fn lookup(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }

    /// The collected variables, sorted by name.
    pub fn sorted(&self) -> Vec<(&str, &str)> {
        let mut vars: Vec<_> = self
            .vars
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        vars.sort_unstable();
        vars
    }

    /// Number of collected variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// No override variable is set.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Resolves a capability document against an override lookup.
///
/// The source is left untouched; a new tree is returned with the same key order.
pub fn resolve<F>(source: &Map<String, Value>, env_lookup: F) -> ConfigMap
where
    F: Fn(&str) -> Option<String>,
{
    resolve_object(source, &OverridePath::root(), &env_lookup)
}

fn resolve_object<F>(source: &Map<String, Value>, path: &OverridePath, env_lookup: &F) -> ConfigMap
where
    F: Fn(&str) -> Option<String>,
{
    source
        .iter()
        .map(|(key, value)| (key.clone(), resolve_node(value, path.child(key.as_str()), env_lookup)))
        .collect()
}

fn resolve_node<F>(value: &Value, path: OverridePath, env_lookup: &F) -> ConfigTree
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::Object(map) => ConfigTree::Object(resolve_object(map, &path, env_lookup)),
        Value::Array(items) => ConfigTree::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| resolve_node(item, path.index(i), env_lookup))
                .collect(),
        ),
        leaf => resolve_leaf(leaf, &path, env_lookup),
    }
}

fn resolve_leaf<F>(value: &Value, path: &OverridePath, env_lookup: &F) -> ConfigTree
where
    F: Fn(&str) -> Option<String>,
{
    let name = path.lookup_name();
    match env_lookup(&name) {
        Some(overridden) => {
            log::debug!("Capability '{}' overridden from environment.", name);
            ConfigTree::Scalar(overridden)
        }
        None => ConfigTree::Scalar(display_string(value)),
    }
}

/// Renders a JSON leaf the way it reads in the file, without quotes around strings.
/// Numbers keep their source digits (`arbitrary_precision`), however wide.
fn display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
