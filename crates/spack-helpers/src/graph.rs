use crate::spec::{Spec, VariantValue, Version};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

mod lockfile;

pub use lockfile::{Lockfile, LockfileGraphProvider, load_lockfile};

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("failed to read lockfile: {path}: {source}")]
    ReadLockfile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse lockfile JSON: {path}: {message}")]
    ParseLockfile { path: PathBuf, message: String },
    #[error("hash {hash} appears with two different attribute sets ({first} vs {second})")]
    ConflictingNode {
        hash: String,
        first: String,
        second: String,
    },
    #[error("edge {parent} -> {child} references an unknown node")]
    DanglingEdge { parent: String, child: String },
    #[error("unknown dependency type {value:?} on edge {parent} -> {child}")]
    InvalidDependencyType {
        parent: String,
        child: String,
        value: String,
    },
    #[error("edge {parent} -> {child} has no dependency type")]
    MissingDependencyType { parent: String, child: String },
    #[error("root {hash} is not a node of the graph")]
    UnknownRoot { hash: String },
}

impl GraphError {
    pub fn code(&self) -> &'static str {
        match self {
            GraphError::ReadLockfile { .. } => "graph.lockfile_read_failed",
            GraphError::ParseLockfile { .. } => "graph.lockfile_parse_failed",
            GraphError::ConflictingNode { .. } => "graph.conflicting_node",
            GraphError::DanglingEdge { .. } => "graph.dangling_edge",
            GraphError::InvalidDependencyType { .. } => "graph.invalid_dependency_type",
            GraphError::MissingDependencyType { .. } => "graph.missing_dependency_type",
            GraphError::UnknownRoot { .. } => "graph.unknown_root",
        }
    }
}

/// Language capabilities a node can resolve to a compiler package.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum CompilerSlot {
    C,
    Cxx,
    Fortran,
}

impl CompilerSlot {
    pub const ALL: [CompilerSlot; 3] = [CompilerSlot::C, CompilerSlot::Cxx, CompilerSlot::Fortran];

    pub fn as_str(self) -> &'static str {
        match self {
            CompilerSlot::C => "c",
            CompilerSlot::Cxx => "cxx",
            CompilerSlot::Fortran => "fortran",
        }
    }

    pub fn from_virtual(name: &str) -> Option<Self> {
        match name {
            "c" => Some(CompilerSlot::C),
            "cxx" | "c++" => Some(CompilerSlot::Cxx),
            "fortran" => Some(CompilerSlot::Fortran),
            _ => None,
        }
    }
}

impl fmt::Display for CompilerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepType {
    Build,
    Link,
    Run,
    Test,
}

impl DepType {
    fn bit(self) -> u8 {
        match self {
            DepType::Build => 1,
            DepType::Link => 1 << 1,
            DepType::Run => 1 << 2,
            DepType::Test => 1 << 3,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "build" => Some(DepType::Build),
            "link" => Some(DepType::Link),
            "run" => Some(DepType::Run),
            "test" => Some(DepType::Test),
            _ => None,
        }
    }
}

/// Set of relationship kinds carried by one edge (or unioned over several).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct DepTypes(u8);

impl DepTypes {
    pub const BUILD: DepTypes = DepTypes(1);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn of(kinds: &[DepType]) -> Self {
        kinds.iter().fold(Self::empty(), |acc, k| acc.with(*k))
    }

    pub fn with(self, kind: DepType) -> Self {
        Self(self.0 | kind.bit())
    }

    pub fn union(self, other: DepTypes) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(self, kind: DepType) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_build_only(self) -> bool {
        self == Self::BUILD
    }
}

impl fmt::Display for DepTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (DepType::Build, "build"),
            (DepType::Link, "link"),
            (DepType::Run, "run"),
            (DepType::Test, "test"),
        ]
        .into_iter()
        .filter(|(k, _)| self.contains(*k))
        .map(|(_, n)| n)
        .collect();
        f.write_str(&names.join(","))
    }
}

/// A realized package in the concrete graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageNode {
    pub name: String,
    pub version: String,
    pub hash: String,
    pub external: bool,
    pub variants: BTreeMap<String, VariantValue>,
}

impl PackageNode {
    pub fn new(name: impl Into<String>, version: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            hash: hash.into(),
            external: false,
            variants: BTreeMap::new(),
        }
    }

    pub fn external(mut self, external: bool) -> Self {
        self.external = external;
        self
    }

    pub fn variant(mut self, key: impl Into<String>, value: VariantValue) -> Self {
        self.variants.insert(key.into(), value);
        self
    }

    pub fn short_hash(&self) -> &str {
        let end = self
            .hash
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.hash.len());
        &self.hash[..end]
    }

    /// Parsed version; `git.<ref>=<version>` pins use the version after `=`.
    pub fn parsed_version(&self) -> Option<Version> {
        let raw = match self.version.split_once('=') {
            Some((_, pinned)) => pinned,
            None => self.version.as_str(),
        };
        Version::parse(raw).ok()
    }

    /// This node's identity as a spec, for pattern satisfaction.
    pub fn as_spec(&self) -> Spec {
        match self.parsed_version() {
            Some(v) => Spec::concrete(&self.name, v, self.variants.clone()),
            None => Spec {
                name: self.name.clone(),
                versions: None,
                variants: self.variants.clone(),
                dependencies: vec![],
            },
        }
    }
}

impl fmt::Display for PackageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.name, self.version, self.short_hash())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub parent: String,
    pub child: String,
    pub deptypes: DepTypes,
    /// Virtual capabilities the child provides to the parent (`c`, `cxx`, `mpi`, ...).
    pub virtuals: Vec<String>,
}

/// Read-only view of a concretized environment.
#[derive(Debug, Clone, Default)]
pub struct ConcreteGraph {
    nodes: IndexMap<String, PackageNode>,
    edges: Vec<DependencyEdge>,
    roots: Vec<String>,
    incoming: HashMap<String, Vec<usize>>,
    outgoing: HashMap<String, Vec<usize>>,
}

impl ConcreteGraph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PackageNode> {
        self.nodes.values()
    }

    pub fn node(&self, hash: &str) -> Option<&PackageNode> {
        self.nodes.get(hash)
    }

    pub fn roots(&self) -> impl Iterator<Item = &PackageNode> {
        self.roots.iter().filter_map(|h| self.nodes.get(h))
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn incoming(&self, hash: &str) -> impl Iterator<Item = &DependencyEdge> {
        self.incoming
            .get(hash)
            .into_iter()
            .flatten()
            .map(|&idx| &self.edges[idx])
    }

    pub fn dependencies(&self, hash: &str) -> impl Iterator<Item = (&DependencyEdge, &PackageNode)> {
        self.outgoing
            .get(hash)
            .into_iter()
            .flatten()
            .filter_map(|&idx| {
                let edge = &self.edges[idx];
                self.nodes.get(&edge.child).map(|child| (edge, child))
            })
    }

    pub fn has_direct_dependency(&self, hash: &str, name: &str) -> bool {
        self.dependencies(hash).any(|(_, child)| child.name == name)
    }

    /// The node supplying `slot` to `hash`, if the edge exists.
    pub fn language_provider(&self, hash: &str, slot: CompilerSlot) -> Option<&PackageNode> {
        self.dependencies(hash)
            .find(|(edge, _)| {
                edge.virtuals
                    .iter()
                    .any(|v| CompilerSlot::from_virtual(v) == Some(slot))
            })
            .map(|(_, child)| child)
    }

    /// Resolved compiler slots of `hash`, in c / cxx / fortran order.
    pub fn language_providers(&self, hash: &str) -> Vec<(CompilerSlot, &PackageNode)> {
        CompilerSlot::ALL
            .into_iter()
            .filter_map(|slot| self.language_provider(hash, slot).map(|p| (slot, p)))
            .collect()
    }

    /// Names whose incoming edges, over the whole graph, carry exactly `{build}`.
    ///
    /// A name referenced as `build` in one place and `link` elsewhere is not
    /// build-only, even if the two references point at different hashes.
    pub fn build_only_names(&self) -> BTreeSet<String> {
        let mut kinds_by_name: BTreeMap<&str, DepTypes> = BTreeMap::new();
        for edge in &self.edges {
            let Some(child) = self.nodes.get(&edge.child) else {
                continue;
            };
            let entry = kinds_by_name.entry(child.name.as_str()).or_default();
            *entry = entry.union(edge.deptypes);
        }
        kinds_by_name
            .into_iter()
            .filter(|(_, kinds)| kinds.is_build_only())
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

/// Source of the concrete graph; the lockfile reader in production, an
/// in-memory graph in tests.
pub trait GraphProvider {
    fn load_graph(&self) -> Result<ConcreteGraph, GraphError>;
}

impl GraphProvider for ConcreteGraph {
    fn load_graph(&self) -> Result<ConcreteGraph, GraphError> {
        Ok(self.clone())
    }
}

#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<PackageNode>,
    edges: Vec<DependencyEdge>,
    roots: Vec<String>,
}

impl GraphBuilder {
    pub fn node(mut self, node: PackageNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn root(mut self, node: PackageNode) -> Self {
        self.roots.push(node.hash.clone());
        self.nodes.push(node);
        self
    }

    pub fn edge(
        mut self,
        parent: &str,
        child: &str,
        deptypes: DepTypes,
        virtuals: &[&str],
    ) -> Self {
        self.edges.push(DependencyEdge {
            parent: parent.to_string(),
            child: child.to_string(),
            deptypes,
            virtuals: virtuals.iter().map(|v| v.to_string()).collect(),
        });
        self
    }

    pub(crate) fn push_node(&mut self, node: PackageNode) {
        self.nodes.push(node);
    }

    pub(crate) fn push_edge(&mut self, edge: DependencyEdge) {
        self.edges.push(edge);
    }

    pub(crate) fn push_root(&mut self, hash: String) {
        self.roots.push(hash);
    }

    pub fn build(self) -> Result<ConcreteGraph, GraphError> {
        let mut nodes: IndexMap<String, PackageNode> = IndexMap::new();
        for node in self.nodes {
            match nodes.get(&node.hash) {
                Some(existing) if existing == &node => {}
                Some(existing) => {
                    return Err(GraphError::ConflictingNode {
                        hash: node.hash.clone(),
                        first: existing.to_string(),
                        second: node.to_string(),
                    });
                }
                None => {
                    nodes.insert(node.hash.clone(), node);
                }
            }
        }

        let mut edges: Vec<DependencyEdge> = vec![];
        let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        for edge in self.edges {
            if !nodes.contains_key(&edge.parent) || !nodes.contains_key(&edge.child) {
                return Err(GraphError::DanglingEdge {
                    parent: edge.parent,
                    child: edge.child,
                });
            }
            let seen = outgoing
                .get(&edge.parent)
                .is_some_and(|idxs| idxs.iter().any(|&i| edges[i] == edge));
            if seen {
                continue;
            }
            let idx = edges.len();
            incoming.entry(edge.child.clone()).or_default().push(idx);
            outgoing.entry(edge.parent.clone()).or_default().push(idx);
            edges.push(edge);
        }

        let mut roots: Vec<String> = vec![];
        for hash in self.roots {
            if !nodes.contains_key(&hash) {
                return Err(GraphError::UnknownRoot { hash });
            }
            if !roots.contains(&hash) {
                roots.push(hash);
            }
        }

        Ok(ConcreteGraph {
            nodes,
            edges,
            roots,
            incoming,
            outgoing,
        })
    }
}
