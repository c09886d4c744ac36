//! Pre-fetching language package-manager dependencies (Go modules, Cargo
//! crates) for staged sources, so later builds can run offline.

use crate::graph::{ConcreteGraph, PackageNode};
use crate::spec::Spec;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

mod runner;
mod spack;

pub use runner::{ProcessRunner, RunnerLimits, run_command};
pub use spack::SpackCli;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to stage {package}: {message}")]
    Stage { package: String, message: String },
    #[error("failed to install {package}: {message}")]
    Install { package: String, message: String },
    #[error(
        "could not find '{tool}' executable; install the '{dependency}' package as a dependency, use {flag}, or ensure '{tool}' is in your PATH"
    )]
    ToolNotFound {
        tool: &'static str,
        dependency: &'static str,
        flag: &'static str,
    },
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("'{command}' failed for {package} (exit code {exit_code:?}): {stderr_tail}")]
    ToolFailed {
        command: String,
        package: String,
        exit_code: Option<i32>,
        stderr_tail: String,
    },
    #[error("'{command}' timed out for {package}")]
    ToolTimedOut { command: String, package: String },
}

impl FetchError {
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::Stage { .. } => "fetch.stage_failed",
            FetchError::Install { .. } => "fetch.install_failed",
            FetchError::ToolNotFound { .. } => "fetch.tool_not_found",
            FetchError::Spawn { .. } => "fetch.spawn_failed",
            FetchError::ToolFailed { .. } => "fetch.tool_failed",
            FetchError::ToolTimedOut { .. } => "fetch.tool_timed_out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Go,
    Rust,
}

impl Language {
    /// The package a consumer depends on to get the toolchain.
    pub fn dependency(self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::Rust => "rust",
        }
    }

    pub fn tool(self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::Rust => "cargo",
        }
    }

    pub fn fetch_args(self) -> &'static [&'static str] {
        match self {
            Language::Go => &["mod", "download"],
            Language::Rust => &["fetch"],
        }
    }

    pub fn cache_env(self) -> &'static str {
        match self {
            Language::Go => "GOMODCACHE",
            Language::Rust => "CARGO_HOME",
        }
    }

    /// File the staged source must contain for the fetch to apply.
    pub fn required_manifest(self) -> Option<&'static str> {
        match self {
            Language::Go => None,
            Language::Rust => Some("Cargo.toml"),
        }
    }

    pub fn use_spack_flag(self) -> &'static str {
        match self {
            Language::Go => "--use-spack-go",
            Language::Rust => "--use-spack-rust",
        }
    }
}

/// One external command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl ToolInvocation {
    pub fn display_command(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub stdout_bytes: usize,
    pub stderr_bytes: usize,
    pub stdout_sha256: String,
    pub stderr_sha256: String,
}

#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutcome, FetchError>;
}

/// Expands a package's source so tools can run in it.
#[async_trait]
pub trait PackageStager: Send + Sync {
    /// Returns the staged source directory.
    async fn stage(&self, node: &PackageNode) -> Result<PathBuf, FetchError>;
}

#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Install prefix of `node`, or `None` when it is not installed.
    async fn prefix(&self, node: &PackageNode) -> Result<Option<PathBuf>, FetchError>;
    async fn install(&self, node: &PackageNode) -> Result<(), FetchError>;
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub language: Language,
    /// Restrict to nodes satisfying one of these; empty means every consumer of the toolchain.
    pub patterns: Vec<String>,
    pub use_spack: bool,
    /// `PATH` used for the fallback lookup.
    pub search_path: Option<OsString>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub fetched: Vec<String>,
    /// Nodes whose staged source lacked the language manifest.
    pub skipped: Vec<String>,
}

/// Nodes to fetch for: pattern matches, or every direct consumer of the toolchain package.
pub fn select_nodes<'g>(
    graph: &'g ConcreteGraph,
    language: Language,
    patterns: &[String],
) -> Vec<&'g PackageNode> {
    if patterns.is_empty() {
        return graph
            .nodes()
            .filter(|n| graph.has_direct_dependency(&n.hash, language.dependency()))
            .collect();
    }

    let parsed: Vec<(&String, Spec)> = patterns
        .iter()
        .filter_map(|raw| match Spec::parse(raw) {
            Ok(spec) => Some((raw, spec)),
            Err(e) => {
                warn!(pattern = %raw, "skipping invalid spec: {e}");
                None
            }
        })
        .collect();
    for (raw, pattern) in &parsed {
        if !graph.nodes().any(|n| n.as_spec().satisfies(pattern)) {
            warn!("no concretized specs could be found matching '{raw}'");
        }
    }
    graph
        .nodes()
        .filter(|n| {
            let candidate = n.as_spec();
            parsed.iter().any(|(_, p)| candidate.satisfies(p))
        })
        .collect()
}

pub fn find_on_path(program: &str, search_path: Option<&OsString>) -> Option<PathBuf> {
    let path = search_path?;
    std::env::split_paths(path)
        .map(|dir| dir.join(program))
        .find(|cand| is_executable(cand))
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        std::fs::metadata(path)
            .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

pub struct DependencyFetcher<'a> {
    graph: &'a ConcreteGraph,
    stager: &'a dyn PackageStager,
    installer: &'a dyn PackageInstaller,
    runner: &'a dyn ToolRunner,
}

impl<'a> DependencyFetcher<'a> {
    pub fn new(
        graph: &'a ConcreteGraph,
        stager: &'a dyn PackageStager,
        installer: &'a dyn PackageInstaller,
        runner: &'a dyn ToolRunner,
    ) -> Self {
        Self {
            graph,
            stager,
            installer,
            runner,
        }
    }

    /// Toolchain lookup: the dependency's prefix, then a Spack install of it
    /// (with `use_spack`), then `PATH` (only without `use_spack`).
    pub async fn find_tool(
        &self,
        node: &PackageNode,
        options: &FetchOptions,
    ) -> Result<PathBuf, FetchError> {
        let language = options.language;
        let tool = language.tool();
        let dependency = self
            .graph
            .dependencies(&node.hash)
            .map(|(_, child)| child)
            .find(|child| child.name == language.dependency());

        if let Some(dep) = dependency {
            if let Some(found) = self.tool_in_prefix(dep, tool).await? {
                debug!(path = %found.display(), "using {tool} from spec dependency");
                return Ok(found);
            }
            if options.use_spack {
                info!("installing '{}' from Spack", dep.name);
                self.installer.install(dep).await?;
                if let Some(found) = self.tool_in_prefix(dep, tool).await? {
                    info!(path = %found.display(), "using Spack-installed {tool}");
                    return Ok(found);
                }
            }
        }

        if !options.use_spack
            && let Some(found) = find_on_path(tool, options.search_path.as_ref())
        {
            debug!(path = %found.display(), "using {tool} from PATH");
            return Ok(found);
        }

        Err(FetchError::ToolNotFound {
            tool,
            dependency: language.dependency(),
            flag: language.use_spack_flag(),
        })
    }

    async fn tool_in_prefix(
        &self,
        dep: &PackageNode,
        tool: &str,
    ) -> Result<Option<PathBuf>, FetchError> {
        let Some(prefix) = self.installer.prefix(dep).await? else {
            return Ok(None);
        };
        let candidate = prefix.join("bin").join(tool);
        Ok(is_executable(&candidate).then_some(candidate))
    }

    pub async fn fetch(
        &self,
        nodes: &[&PackageNode],
        options: &FetchOptions,
    ) -> Result<FetchReport, FetchError> {
        let language = options.language;
        let mut report = FetchReport::default();
        for node in nodes {
            let source = self.stager.stage(node).await?;
            if let Some(manifest) = language.required_manifest()
                && !source.join(manifest).is_file()
            {
                debug!(package = %node, "no {manifest} in staged source, skipping");
                report.skipped.push(node.to_string());
                continue;
            }

            info!("fetching {} dependencies for: {node}", language.tool());
            let program = self.find_tool(node, options).await?;
            let invocation = ToolInvocation {
                program,
                args: language.fetch_args().iter().map(|a| a.to_string()).collect(),
                cwd: Some(source),
                env: BTreeMap::new(),
            };
            let outcome = self.runner.run(&invocation).await?;
            if outcome.timed_out {
                return Err(FetchError::ToolTimedOut {
                    command: invocation.display_command(),
                    package: node.to_string(),
                });
            }
            if !outcome.success {
                return Err(FetchError::ToolFailed {
                    command: invocation.display_command(),
                    package: node.to_string(),
                    exit_code: outcome.exit_code,
                    stderr_tail: outcome.stderr_tail,
                });
            }
            info!("fetched dependencies for {}", node.name);
            report.fetched.push(node.to_string());
        }
        Ok(report)
    }
}

/// Warns when the cache directory variable is unset; tools then fall back to their default cache.
pub fn warn_if_cache_unset(language: Language, value: Option<&OsString>) -> bool {
    let unset = value.is_none_or(|v| v.is_empty());
    if unset {
        warn!(
            "{} environment variable not set; {} dependencies will be cached to their default location",
            language.cache_env(),
            language.dependency()
        );
    }
    unset
}
