//! Locating the active environment and the files inside it.

use crate::config::{ConfigError, ConfigStack, EnvManifest};
use crate::graph::{GraphError, Lockfile, load_lockfile};
use crate::spec::Spec;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const ENV_VAR: &str = "SPACK_ENV";
pub const MANIFEST_NAME: &str = "spack.yaml";
pub const LOCKFILE_NAME: &str = "spack.lock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    root: PathBuf,
}

impl Environment {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `--env` wins over `SPACK_ENV`.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::discover_from(explicit, std::env::var_os(ENV_VAR).map(PathBuf::from))
    }

    pub fn discover_from(
        explicit: Option<&Path>,
        from_env: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let root = explicit
            .map(Path::to_path_buf)
            .or(from_env.filter(|p| !p.as_os_str().is_empty()))
            .ok_or(ConfigError::NoActiveEnvironment)?;
        let manifest = root.join(MANIFEST_NAME);
        if !manifest.is_file() {
            return Err(ConfigError::ManifestMissing(manifest));
        }
        debug!(env = %root.display(), "using environment");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_NAME)
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.root.join(LOCKFILE_NAME)
    }

    pub fn is_concretized(&self) -> bool {
        self.lockfile_path().is_file()
    }

    pub fn manifest(&self) -> Result<EnvManifest, ConfigError> {
        EnvManifest::load(&self.manifest_path())
    }

    pub fn lockfile(&self) -> Result<Lockfile, GraphError> {
        load_lockfile(&self.lockfile_path())
    }

    /// Extra scopes (lowest precedence first) followed by the manifest itself.
    pub fn config_stack(
        &self,
        manifest: &EnvManifest,
        scopes: &[PathBuf],
    ) -> Result<ConfigStack, ConfigError> {
        let mut stack = ConfigStack::new();
        for scope in scopes {
            stack.push(EnvManifest::load(scope)?.layer());
        }
        stack.push(manifest.layer());
        Ok(stack)
    }
}

/// User specs that are in the manifest but not among the lockfile roots, and vice versa.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConcretizationGap {
    pub unconcretized: Vec<String>,
    pub stale: Vec<String>,
}

impl ConcretizationGap {
    /// Specs are compared in their parsed form, so spacing and variant order
    /// do not matter. Unparseable strings are compared as trimmed text.
    pub fn between(user_specs: &[String], locked_roots: &[String]) -> Self {
        let user = normalized(user_specs);
        let locked = normalized(locked_roots);
        Self {
            unconcretized: missing_from(&user, &locked),
            stale: missing_from(&locked, &user),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.unconcretized.is_empty() && self.stale.is_empty()
    }

    pub fn warn_if_incomplete(&self) {
        if self.is_empty() {
            return;
        }
        warn!(
            unconcretized = ?self.unconcretized,
            stale = ?self.stale,
            "environment may not be fully concretized; run 'spack concretize' to update"
        );
    }
}

/// Normalized spec -> the text it was written as.
fn normalized(specs: &[String]) -> BTreeMap<String, &str> {
    specs
        .iter()
        .map(|raw| {
            let raw = raw.trim();
            let key = Spec::parse(raw).map_or_else(|_| raw.to_string(), |s| s.to_string());
            (key, raw)
        })
        .collect()
}

fn missing_from(these: &BTreeMap<String, &str>, other: &BTreeMap<String, &str>) -> Vec<String> {
    these
        .iter()
        .filter(|(key, _)| !other.contains_key(*key))
        .map(|(_, raw)| raw.to_string())
        .collect()
}
