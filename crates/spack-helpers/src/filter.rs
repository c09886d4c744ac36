//! Rewriting compiler externals as replace-layer overrides.
//!
//! The effective `packages:` view (all scopes merged) decides which externals
//! exist. Only the environment manifest is written: every modified compiler
//! package gets a `name:` (YAML `name::`) entry holding its complete new
//! settings, so lower scopes cannot merge dropped externals back in.

use crate::checks::allowed_compilers::parse_patterns;
use crate::config::{
    ConfigError, ConfigKey, ConfigLayer, ConfigStack, EnvManifest, ExternalEntry, ExternalSlot,
    MergeStrategy, PackageEntry, PackageSettings, PackagesConfig, SaveOptions,
};
use crate::graph::CompilerSlot;
use crate::spec::Spec;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const COMPILER_PACKAGES: [&str; 8] = [
    "gcc",
    "llvm",
    "clang",
    "intel-oneapi-compilers",
    "intel-oneapi-compilers-classic",
    "aocc",
    "nvhpc",
    "apple-clang",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterMode {
    /// Drop externals matching any pattern.
    Remove,
    /// Keep only externals matching some pattern.
    KeepOnly,
}

impl FilterMode {
    fn keeps(self, external: &Spec, patterns: &[Spec]) -> bool {
        let matched = patterns.iter().any(|p| external.satisfies(p));
        match self {
            FilterMode::Remove => !matched,
            FilterMode::KeepOnly => matched,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOutcome {
    /// Replacement settings per modified compiler package, in config order.
    pub overrides: IndexMap<String, PackageSettings>,
}

impl FilterOutcome {
    pub fn modified_count(&self) -> usize {
        self.overrides.len()
    }
}

/// Computes the replacement settings for every compiler package whose
/// parsable externals change under `mode`. Pure; nothing is written.
pub fn plan_compiler_filter(
    effective: &IndexMap<String, PackageEntry>,
    patterns: &[Spec],
    mode: FilterMode,
) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    for (name, entry) in effective {
        if !COMPILER_PACKAGES.contains(&name.as_str()) {
            continue;
        }
        let Some(settings) = entry.settings() else {
            continue;
        };

        let candidates: Vec<(Spec, &ExternalEntry)> = settings
            .external_entries()
            .filter_map(|external| match Spec::parse(&external.spec) {
                Ok(spec) => Some((spec, external)),
                Err(e) => {
                    debug!(package = %name, spec = %external.spec, "ignoring unparsable external: {e}");
                    None
                }
            })
            .collect();
        if candidates.is_empty() {
            continue;
        }

        let kept: Vec<ExternalSlot> = candidates
            .iter()
            .filter(|(spec, _)| {
                let keep = mode.keeps(spec, patterns);
                debug!(package = %name, spec = %spec, keep, ?mode, "external");
                keep
            })
            .map(|(_, external)| ExternalSlot::Entry((*external).clone()))
            .collect();

        if kept.len() != candidates.len() {
            let mut replacement = settings.clone();
            replacement.externals = Some(kept);
            outcome.overrides.insert(name.clone(), replacement);
        }
    }
    outcome
}

/// Installs each override as a replace entry, dropping earlier entries for the
/// same package under either spelling.
pub fn apply_overrides(packages: &mut PackagesConfig, outcome: &FilterOutcome) {
    for (name, settings) in &outcome.overrides {
        packages.remove_package(name);
        packages.insert(
            ConfigKey::new(name.clone(), MergeStrategy::Replace),
            PackageEntry::Settings(settings.clone()),
        );
    }
}

/// Sets `buildable: false` on the `c`, `cxx` and `fortran` virtuals.
pub fn mark_compiler_languages_unbuildable(packages: &mut PackagesConfig) {
    for slot in CompilerSlot::ALL {
        packages.update_settings(slot.as_str(), |s| s.buildable = Some(false));
    }
}

#[derive(Debug, Clone)]
pub struct FilterRequest {
    pub patterns: Vec<String>,
    pub mode: FilterMode,
    pub all_compilers_unbuildable: bool,
    pub save: SaveOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterReport {
    pub outcome: FilterOutcome,
    pub manifest_written: bool,
}

/// Filters compiler externals seen through `lower` scopes plus `manifest`, and
/// writes the manifest when anything changed.
pub fn filter_compiler_packages(
    manifest: &mut EnvManifest,
    lower: &[ConfigLayer],
    request: &FilterRequest,
) -> Result<FilterReport, ConfigError> {
    let (patterns, invalid) = parse_patterns(&request.patterns);
    if patterns.is_empty() {
        debug!(?invalid, "no usable compiler patterns");
        return Err(ConfigError::NoCompilersSpecified);
    }

    let mut stack = ConfigStack::new();
    for layer in lower {
        stack.push(layer.clone());
    }
    stack.push(manifest.layer());
    let outcome = plan_compiler_filter(&stack.effective_packages(), &patterns, request.mode);

    if outcome.modified_count() > 0 {
        apply_overrides(manifest.packages_mut(), &outcome);
        info!(
            count = outcome.modified_count(),
            "filtered compiler package(s) from packages configuration"
        );
    } else {
        info!("no compiler packages were filtered");
    }
    if request.all_compilers_unbuildable {
        mark_compiler_languages_unbuildable(manifest.packages_mut());
        info!("set c, cxx and fortran as unbuildable");
    }

    let manifest_written = manifest.is_changed();
    if manifest_written {
        manifest.save(request.save)?;
        info!(path = %manifest.path().display(), "environment configuration updated");
    }
    Ok(FilterReport {
        outcome,
        manifest_written,
    })
}
