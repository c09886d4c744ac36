use crate::graph::PackageNode;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

/// A concrete node as it appears in reports.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct NodeRef {
    pub name: String,
    pub version: String,
    pub hash: String,
    #[serde(default)]
    pub external: bool,
}

impl From<&PackageNode> for NodeRef {
    fn from(node: &PackageNode) -> Self {
        Self {
            name: node.name.clone(),
            version: node.version.clone(),
            hash: node.hash.clone(),
            external: node.external,
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.hash.get(..7).unwrap_or(&self.hash);
        write!(f, "{}@{}/{}", self.name, self.version, short)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ViolationTier {
    #[default]
    Blocking,
    Observation,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Violation {
    pub code: String,
    pub message: String,
    pub node: Option<NodeRef>,
    pub details: Option<serde_json::Value>,
    #[serde(default)]
    pub tier: ViolationTier,
}

impl Violation {
    pub fn blocking(
        code: impl Into<String>,
        message: impl Into<String>,
        node: Option<NodeRef>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            node,
            details,
            tier: ViolationTier::Blocking,
        }
    }

    pub fn observation(
        code: impl Into<String>,
        message: impl Into<String>,
        node: Option<NodeRef>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            node,
            details,
            tier: ViolationTier::Observation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ValidateOutput {
    pub ok: bool,
    pub error: Option<ApiError>,
    pub schema_version: String,
    pub env_root: Option<String>,
    /// sha256 of the `spack.lock` the checks ran against.
    pub lockfile_sha256: Option<String>,
    pub checks_run: Vec<String>,
    pub violations: Vec<Violation>,
    /// Non-blocking findings (e.g. an environment that is not fully concretized).
    #[serde(default)]
    pub observations: Vec<Violation>,
}

impl ValidateOutput {
    pub fn new(env_root: Option<String>) -> Self {
        Self {
            ok: true,
            error: None,
            schema_version: SCHEMA_VERSION.to_string(),
            env_root,
            lockfile_sha256: None,
            checks_run: vec![],
            violations: vec![],
            observations: vec![],
        }
    }

    /// Sorts violations into the blocking list or the observation list by tier.
    pub fn extend(&mut self, check: &str, violations: Vec<Violation>) {
        self.checks_run.push(check.to_string());
        for v in violations {
            match v.tier {
                ViolationTier::Blocking => self.violations.push(v),
                ViolationTier::Observation => self.observations.push(v),
            }
        }
        self.ok = self.error.is_none() && self.violations.is_empty();
    }

    pub fn fail(&mut self, code: &str, message: String) {
        self.error = Some(ApiError {
            code: code.to_string(),
            message,
        });
        self.ok = false;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FilterOutput {
    pub ok: bool,
    pub error: Option<ApiError>,
    pub modified_count: usize,
    /// Compiler packages whose externals were rewritten.
    pub modified: Vec<String>,
    pub manifest_written: bool,
}
