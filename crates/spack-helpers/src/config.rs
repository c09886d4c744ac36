//! Layered `packages:` configuration.
//!
//! A package's settings are modelled as the keys this crate interprets
//! (`buildable`, `externals`) plus an opaque bucket holding every other key
//! verbatim, so rewrites never lose `require`, `variants`, `prefer` and the
//! like. How a layer combines with the ones below it is an explicit
//! [`MergeStrategy`], which maps onto Spack's `name:` / `name::` keys.

use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};
use std::fmt;

mod errors;
mod manifest;

pub use errors::ConfigError;
pub use manifest::{EnvManifest, ManifestKind, SaveOptions};

/// How a layer's entry for a package combines with lower-precedence layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MergeStrategy {
    /// Deep-merge with lower layers (`gcc:`).
    #[default]
    Merge,
    /// Discard everything lower layers say about this package (`gcc::`).
    Replace,
}

/// A `packages:` key: the package name plus the merge strategy its spelling encodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigKey {
    pub name: String,
    pub strategy: MergeStrategy,
}

impl ConfigKey {
    pub fn new(name: impl Into<String>, strategy: MergeStrategy) -> Self {
        Self {
            name: name.into(),
            strategy,
        }
    }

    /// `gcc:` (YAML `gcc::`) parses as a replace of `gcc`.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_suffix(':') {
            Some(name) => Self::new(name.trim_end_matches(':'), MergeStrategy::Replace),
            None => Self::new(raw, MergeStrategy::Merge),
        }
    }

    pub fn render(&self) -> String {
        match self.strategy {
            MergeStrategy::Merge => self.name.clone(),
            MergeStrategy::Replace => format!("{}:", self.name),
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// One declared external installation: a spec string plus opaque attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalEntry {
    pub spec: String,
    /// `prefix`, `modules`, `extra_attributes`, ... kept verbatim.
    pub attrs: Mapping,
}

impl ExternalEntry {
    pub fn new(spec: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            attrs: Mapping::new(),
        }
    }

    pub fn attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attrs.insert(Value::String(key.to_string()), value.into());
        self
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    fn to_value(&self) -> Value {
        let mut m = Mapping::new();
        m.insert(Value::String("spec".to_string()), Value::String(self.spec.clone()));
        for (k, v) in &self.attrs {
            m.insert(k.clone(), v.clone());
        }
        Value::Mapping(m)
    }
}

/// An `externals:` item; malformed items are carried but never interpreted.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalSlot {
    Entry(ExternalEntry),
    Opaque(Value),
}

impl ExternalSlot {
    fn from_value(value: &Value) -> Self {
        let Value::Mapping(m) = value else {
            return ExternalSlot::Opaque(value.clone());
        };
        let Some(spec) = m.get("spec").and_then(Value::as_str) else {
            return ExternalSlot::Opaque(value.clone());
        };
        let attrs = m
            .iter()
            .filter(|(k, _)| k.as_str() != Some("spec"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ExternalSlot::Entry(ExternalEntry {
            spec: spec.to_string(),
            attrs,
        })
    }

    fn to_value(&self) -> Value {
        match self {
            ExternalSlot::Entry(e) => e.to_value(),
            ExternalSlot::Opaque(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PackageSettings {
    pub buildable: Option<bool>,
    pub externals: Option<Vec<ExternalSlot>>,
    /// Every key not modelled above, in file order.
    pub extra: Mapping,
}

impl PackageSettings {
    /// `None` when the value is not a mapping.
    pub fn from_value(value: &Value) -> Option<Self> {
        let Value::Mapping(m) = value else {
            return None;
        };
        let mut out = PackageSettings::default();
        for (key, v) in m {
            match (key.as_str(), v) {
                (Some("buildable"), Value::Bool(b)) => out.buildable = Some(*b),
                (Some("externals"), Value::Sequence(items)) => {
                    out.externals = Some(items.iter().map(ExternalSlot::from_value).collect());
                }
                _ => {
                    out.extra.insert(key.clone(), v.clone());
                }
            }
        }
        Some(out)
    }

    pub fn to_value(&self) -> Value {
        let mut m = Mapping::new();
        if let Some(b) = self.buildable {
            m.insert(Value::String("buildable".to_string()), Value::Bool(b));
        }
        if let Some(externals) = &self.externals {
            m.insert(
                Value::String("externals".to_string()),
                Value::Sequence(externals.iter().map(ExternalSlot::to_value).collect()),
            );
        }
        for (k, v) in &self.extra {
            m.insert(k.clone(), v.clone());
        }
        Value::Mapping(m)
    }

    /// Well-formed external entries only.
    pub fn external_entries(&self) -> impl Iterator<Item = &ExternalEntry> {
        self.externals.iter().flatten().filter_map(|slot| match slot {
            ExternalSlot::Entry(e) => Some(e),
            ExternalSlot::Opaque(_) => None,
        })
    }
}

/// A package's configuration value; non-mapping values stay opaque.
#[derive(Debug, Clone, PartialEq)]
pub enum PackageEntry {
    Settings(PackageSettings),
    Opaque(Value),
}

impl PackageEntry {
    pub fn from_value(value: &Value) -> Self {
        match PackageSettings::from_value(value) {
            Some(s) => PackageEntry::Settings(s),
            None => PackageEntry::Opaque(value.clone()),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            PackageEntry::Settings(s) => s.to_value(),
            PackageEntry::Opaque(v) => v.clone(),
        }
    }

    pub fn settings(&self) -> Option<&PackageSettings> {
        match self {
            PackageEntry::Settings(s) => Some(s),
            PackageEntry::Opaque(_) => None,
        }
    }
}

/// The `packages:` section of one configuration layer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PackagesConfig {
    entries: IndexMap<ConfigKey, PackageEntry>,
}

impl PackagesConfig {
    pub fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Mapping(m) => {
                let mut entries = IndexMap::new();
                for (k, v) in m {
                    let Some(raw) = k.as_str() else {
                        return Err(format!("non-string package key {k:?}"));
                    };
                    entries.insert(ConfigKey::parse(raw), PackageEntry::from_value(v));
                }
                Ok(Self { entries })
            }
            other => Err(format!("packages section must be a mapping, got {other:?}")),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Mapping(
            self.entries
                .iter()
                .map(|(k, v)| (Value::String(k.render()), v.to_value()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConfigKey, &PackageEntry)> {
        self.entries.iter()
    }

    /// The entry for `name`, whichever spelling it was written with (the later one wins).
    pub fn get(&self, name: &str) -> Option<(MergeStrategy, &PackageEntry)> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k.name == name)
            .map(|(k, v)| (k.strategy, v))
    }

    pub fn settings(&self, name: &str) -> Option<&PackageSettings> {
        self.get(name).and_then(|(_, e)| e.settings())
    }

    /// Edits the settings for `name` in place, creating an empty mergeable
    /// entry when absent. Opaque values are replaced by empty settings.
    pub fn update_settings<R>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut PackageSettings) -> R,
    ) -> R {
        let key = self
            .entries
            .keys()
            .rev()
            .find(|k| k.name == name)
            .cloned()
            .unwrap_or_else(|| ConfigKey::new(name, MergeStrategy::Merge));
        let entry = self
            .entries
            .entry(key)
            .or_insert_with(|| PackageEntry::Settings(PackageSettings::default()));
        let mut settings = match entry {
            PackageEntry::Settings(s) => std::mem::take(s),
            PackageEntry::Opaque(_) => PackageSettings::default(),
        };
        let out = f(&mut settings);
        *entry = PackageEntry::Settings(settings);
        out
    }

    /// Removes every spelling of `name`; returns how many entries went away.
    pub fn remove_package(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| k.name != name);
        before - self.entries.len()
    }

    pub fn insert(&mut self, key: ConfigKey, entry: PackageEntry) {
        self.entries.insert(key, entry);
    }
}

/// One configuration scope, e.g. a site `packages.yaml` or the environment manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigLayer {
    pub name: String,
    pub packages: PackagesConfig,
}

/// Configuration scopes ordered from lowest to highest precedence.
#[derive(Debug, Clone, Default)]
pub struct ConfigStack {
    layers: Vec<ConfigLayer>,
}

impl ConfigStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, layer: ConfigLayer) {
        self.layers.push(layer);
    }

    /// The merged view every consumer of `packages:` sees.
    pub fn effective_packages(&self) -> IndexMap<String, PackageEntry> {
        let mut merged: IndexMap<String, Value> = IndexMap::new();
        for layer in &self.layers {
            for (key, entry) in layer.packages.iter() {
                let higher = entry.to_value();
                match key.strategy {
                    MergeStrategy::Replace => {
                        merged.insert(key.name.clone(), normalize_override_keys(higher));
                    }
                    MergeStrategy::Merge => match merged.get_mut(&key.name) {
                        Some(lower) => {
                            let prev = std::mem::replace(lower, Value::Null);
                            *lower = merge_values(prev, higher);
                        }
                        None => {
                            merged.insert(key.name.clone(), normalize_override_keys(higher));
                        }
                    },
                }
            }
        }
        merged
            .into_iter()
            .map(|(name, value)| (name, PackageEntry::from_value(&value)))
            .collect()
    }
}

/// Strips the trailing `:` that marks nested override keys once layering is resolved.
fn normalize_override_keys(value: Value) -> Value {
    match value {
        Value::Mapping(m) => Value::Mapping(
            m.into_iter()
                .map(|(k, v)| (strip_override(k), normalize_override_keys(v)))
                .collect(),
        ),
        other => other,
    }
}

fn strip_override(key: Value) -> Value {
    match key {
        Value::String(s) if s.ends_with(':') => {
            Value::String(s.trim_end_matches(':').to_string())
        }
        other => other,
    }
}

/// Spack-style deep merge: maps merge recursively, lists put higher-precedence
/// items first without repeating lower ones, scalars are overridden.
pub fn merge_values(lower: Value, higher: Value) -> Value {
    match (lower, higher) {
        (Value::Mapping(mut low), Value::Mapping(high)) => {
            for (k, v) in high {
                let replace = k.as_str().is_some_and(|s| s.ends_with(':'));
                let k = strip_override(k);
                match low.get_mut(&k) {
                    Some(existing) if !replace => {
                        let prev = std::mem::replace(existing, Value::Null);
                        *existing = merge_values(prev, v);
                    }
                    Some(existing) => *existing = normalize_override_keys(v),
                    None => {
                        low.insert(k, normalize_override_keys(v));
                    }
                }
            }
            Value::Mapping(low)
        }
        (Value::Sequence(low), Value::Sequence(high)) => {
            let mut out: Vec<Value> = high.into_iter().map(normalize_override_keys).collect();
            for item in low {
                if !out.contains(&item) {
                    out.push(item);
                }
            }
            Value::Sequence(out)
        }
        (_, higher) => normalize_override_keys(higher),
    }
}
