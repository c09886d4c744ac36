//! `validate run`: every check configured in one TOML policy file.
//!
//! ```toml
//! [duplicates]
//! ignore = ["py-setuptools"]
//! ignore_build_only = true
//!
//! [[compiler_usage]]
//! compiler = "gcc"
//! allowed = ["gmake"]
//!
//! [allowed_compilers]
//! compilers = ["gcc@11.2.0", "llvm@17:"]
//!
//! [approved_packages]
//! packages_file = "approved.txt"
//!
//! [buildable]
//! ```

use crate::allowlist::read_name_list;
use crate::api::ValidateOutput;
use crate::checks::{
    allowed_compilers::run_allowed_compilers_check, approved::run_approved_packages_check,
    buildable::run_buildable_check, compiler_usage::run_compiler_usage_check,
    duplicates::run_duplicates_check,
};
use crate::config::{ConfigError, PackageEntry};
use crate::graph::ConcreteGraph;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    #[serde(default)]
    pub duplicates: Option<DuplicatesPolicy>,
    #[serde(default)]
    pub compiler_usage: Vec<CompilerUsagePolicy>,
    #[serde(default)]
    pub allowed_compilers: Option<AllowedCompilersPolicy>,
    #[serde(default)]
    pub approved_packages: Option<ApprovedPackagesPolicy>,
    #[serde(default)]
    pub buildable: Option<BuildablePolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DuplicatesPolicy {
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub ignore_build_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CompilerUsagePolicy {
    pub compiler: String,
    #[serde(default)]
    pub allowed: Vec<String>,
    /// Name list file, relative to the policy file.
    #[serde(default)]
    pub allowed_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AllowedCompilersPolicy {
    pub compilers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ApprovedPackagesPolicy {
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub packages_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BuildablePolicy {}

impl PolicyConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadPolicy {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::ParsePolicy {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.duplicates.is_none()
            && self.compiler_usage.is_empty()
            && self.allowed_compilers.is_none()
            && self.approved_packages.is_none()
            && self.buildable.is_none()
    }
}

fn names_with_file(
    inline: &[String],
    file: Option<&Path>,
    base_dir: &Path,
) -> Result<BTreeSet<String>, ConfigError> {
    let mut names: BTreeSet<String> = inline.iter().cloned().collect();
    if let Some(file) = file {
        names.extend(read_name_list(&base_dir.join(file))?);
    }
    Ok(names)
}

/// Runs every configured check against `graph`, adding results to `out`.
/// `base_dir` resolves list files named in the policy.
pub fn run_policy(
    policy: &PolicyConfig,
    graph: &ConcreteGraph,
    packages: &IndexMap<String, PackageEntry>,
    base_dir: &Path,
    out: &mut ValidateOutput,
) -> Result<(), ConfigError> {
    if let Some(cfg) = &policy.duplicates {
        let ignore: BTreeSet<String> = cfg.ignore.iter().cloned().collect();
        let r = run_duplicates_check(graph, &ignore, cfg.ignore_build_only);
        out.extend("duplicates", r.violations);
    }
    for cfg in &policy.compiler_usage {
        let allowed = names_with_file(&cfg.allowed, cfg.allowed_file.as_deref(), base_dir)?;
        let r = run_compiler_usage_check(graph, &cfg.compiler, &allowed);
        out.extend(&format!("compiler_usage:{}", cfg.compiler), r.violations);
    }
    if let Some(cfg) = &policy.allowed_compilers {
        if cfg.compilers.is_empty() {
            return Err(ConfigError::NoCompilersSpecified);
        }
        let r = run_allowed_compilers_check(graph, &cfg.compilers);
        out.extend("allowed_compilers", r.violations);
    }
    if let Some(cfg) = &policy.approved_packages {
        let approved = names_with_file(&cfg.packages, cfg.packages_file.as_deref(), base_dir)?;
        if approved.is_empty() {
            return Err(ConfigError::NoPackagesSpecified);
        }
        let r = run_approved_packages_check(graph, &approved);
        out.extend("approved_packages", r.violations);
    }
    if policy.buildable.is_some() {
        let r = run_buildable_check(graph, packages);
        out.extend("buildable", r.violations);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_deserialize_smoke() {
        let s = r#"
[duplicates]
ignore = ["py-setuptools"]
ignore_build_only = true

[[compiler_usage]]
compiler = "gcc"
allowed = ["gmake"]

[[compiler_usage]]
compiler = "nvhpc"
allowed_file = "nv.txt"

[allowed_compilers]
compilers = ["gcc@11.2.0"]

[approved_packages]
packages = ["zlib"]

[buildable]
"#;
        let cfg: PolicyConfig = toml::from_str(s).expect("parse policy");
        assert!(cfg.duplicates.as_ref().is_some_and(|d| d.ignore_build_only));
        assert_eq!(cfg.compiler_usage.len(), 2);
        assert_eq!(
            cfg.compiler_usage[1].allowed_file.as_deref(),
            Some(Path::new("nv.txt"))
        );
        assert!(cfg.buildable.is_some());
        assert!(!cfg.is_empty());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = toml::from_str::<PolicyConfig>("[duplicates]\nignore_build = true\n").unwrap_err();
        assert!(err.to_string().contains("ignore_build"));
    }

    #[test]
    fn load_reports_parse_failures_with_a_code() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, "[[buildable]]\n").expect("write policy");
        assert_eq!(
            PolicyConfig::load(&path).unwrap_err().code(),
            "config.policy_parse_failed"
        );
        assert_eq!(
            PolicyConfig::load(&dir.path().join("none.toml")).unwrap_err().code(),
            "config.policy_read_failed"
        );
    }
}
