use super::{ConcreteGraph, DepType, DepTypes, DependencyEdge, GraphError, GraphProvider, PackageNode};
use crate::hash::sha256_hex;
use crate::spec::VariantValue;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Node parameters that are build settings rather than variants.
const NON_VARIANT_PARAMETERS: [&str; 7] = [
    "patches", "cflags", "cxxflags", "fflags", "cppflags", "ldflags", "ldlibs",
];

#[derive(Debug, Deserialize)]
struct RawLockfile {
    #[serde(default)]
    roots: Vec<RawRoot>,
    #[serde(default)]
    concrete_specs: IndexMap<String, RawSpec>,
}

#[derive(Debug, Deserialize)]
struct RawRoot {
    hash: String,
    #[serde(default)]
    spec: String,
}

#[derive(Debug, Deserialize)]
struct RawSpec {
    name: String,
    version: String,
    #[serde(default)]
    parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    dependencies: RawDependencies,
    #[serde(default)]
    external: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependencies {
    List(Vec<RawDependency>),
    /// Lockfile v3 and older: `{"name": {"hash": ..., "type": [...]}}`.
    Legacy(IndexMap<String, RawLegacyDependency>),
}

impl Default for RawDependencies {
    fn default() -> Self {
        RawDependencies::List(vec![])
    }
}

/// List-form dependency. Lockfile v5+ nests the kinds under `parameters`;
/// v4 writes them as a top-level `type`.
#[derive(Debug, Deserialize)]
struct RawDependency {
    hash: String,
    #[serde(default)]
    parameters: Option<RawDependencyParameters>,
    #[serde(rename = "type", default)]
    deptypes: Vec<String>,
}

impl RawDependency {
    fn deptypes(&self) -> &[String] {
        match &self.parameters {
            Some(p) if !p.deptypes.is_empty() => &p.deptypes,
            _ => &self.deptypes,
        }
    }

    fn virtuals(&self) -> Vec<String> {
        self.parameters
            .as_ref()
            .map(|p| p.virtuals.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawDependencyParameters {
    #[serde(default)]
    deptypes: Vec<String>,
    #[serde(default)]
    virtuals: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawLegacyDependency {
    hash: String,
    #[serde(rename = "type", default)]
    deptypes: Vec<String>,
}

/// A loaded `spack.lock`.
#[derive(Debug, Clone)]
pub struct Lockfile {
    pub path: PathBuf,
    pub graph: ConcreteGraph,
    /// User spec strings of the roots, as recorded at concretization time.
    pub root_specs: Vec<String>,
    pub sha256: String,
}

pub fn load_lockfile(path: &Path) -> Result<Lockfile, GraphError> {
    let bytes = std::fs::read(path).map_err(|source| GraphError::ReadLockfile {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawLockfile =
        serde_json::from_slice(&bytes).map_err(|e| GraphError::ParseLockfile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let root_specs = raw.roots.iter().map(|r| r.spec.clone()).collect();
    let graph = graph_from_raw(raw)?;
    debug!(
        path = %path.display(),
        nodes = graph.len(),
        edges = graph.edges().len(),
        "loaded lockfile"
    );
    Ok(Lockfile {
        path: path.to_path_buf(),
        graph,
        root_specs,
        sha256: sha256_hex(&bytes),
    })
}

fn parse_deptypes(parent: &str, child: &str, raw: &[String]) -> Result<DepTypes, GraphError> {
    if raw.is_empty() {
        return Err(GraphError::MissingDependencyType {
            parent: parent.to_string(),
            child: child.to_string(),
        });
    }
    let mut out = DepTypes::empty();
    for value in raw {
        let kind = DepType::parse(value).ok_or_else(|| GraphError::InvalidDependencyType {
            parent: parent.to_string(),
            child: child.to_string(),
            value: value.clone(),
        })?;
        out = out.with(kind);
    }
    Ok(out)
}

fn variants_from_parameters(
    parameters: &serde_json::Map<String, serde_json::Value>,
) -> impl Iterator<Item = (String, VariantValue)> + '_ {
    parameters.iter().filter_map(|(key, value)| {
        if NON_VARIANT_PARAMETERS.contains(&key.as_str()) {
            return None;
        }
        let value = match value {
            serde_json::Value::Bool(b) => VariantValue::Bool(*b),
            serde_json::Value::String(s) => VariantValue::Values(vec![s.clone()]),
            serde_json::Value::Array(items) => VariantValue::Values(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => return None,
        };
        Some((key.clone(), value))
    })
}

fn graph_from_raw(raw: RawLockfile) -> Result<ConcreteGraph, GraphError> {
    let mut builder = ConcreteGraph::builder();
    for (hash, spec) in &raw.concrete_specs {
        let mut node = PackageNode::new(&spec.name, &spec.version, hash)
            .external(spec.external.as_ref().is_some_and(|e| !e.is_null()));
        node.variants.extend(variants_from_parameters(&spec.parameters));
        builder.push_node(node);

        match &spec.dependencies {
            RawDependencies::List(deps) => {
                for dep in deps {
                    builder.push_edge(DependencyEdge {
                        parent: hash.clone(),
                        child: dep.hash.clone(),
                        deptypes: parse_deptypes(hash, &dep.hash, dep.deptypes())?,
                        virtuals: dep.virtuals(),
                    });
                }
            }
            RawDependencies::Legacy(deps) => {
                for dep in deps.values() {
                    builder.push_edge(DependencyEdge {
                        parent: hash.clone(),
                        child: dep.hash.clone(),
                        deptypes: parse_deptypes(hash, &dep.hash, &dep.deptypes)?,
                        virtuals: vec![],
                    });
                }
            }
        }
    }
    for root in raw.roots {
        builder.push_root(root.hash);
    }
    builder.build()
}

/// Reads the graph from a `spack.lock` on every call.
#[derive(Debug, Clone)]
pub struct LockfileGraphProvider {
    path: PathBuf,
}

impl LockfileGraphProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GraphProvider for LockfileGraphProvider {
    fn load_graph(&self) -> Result<ConcreteGraph, GraphError> {
        load_lockfile(&self.path).map(|l| l.graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CompilerSlot;

    const LOCK: &str = r#"{
  "_meta": {"file-type": "spack-lockfile", "lockfile-version": 6, "specfile-version": 5},
  "roots": [
    {"hash": "elfaaaaaaaaa", "spec": "libelf%gcc"}
  ],
  "concrete_specs": {
    "elfaaaaaaaaa": {
      "name": "libelf",
      "version": "0.8.13",
      "parameters": {"build_system": "autotools", "shared": true, "cflags": []},
      "dependencies": [
        {"name": "gcc", "hash": "gccaaaaaaaaa", "parameters": {"deptypes": ["build"], "virtuals": ["c", "cxx"]}},
        {"name": "gmake", "hash": "gmkaaaaaaaaa", "parameters": {"deptypes": ["build"], "virtuals": []}}
      ]
    },
    "gccaaaaaaaaa": {
      "name": "gcc",
      "version": "11.2.0",
      "parameters": {"languages": ["c", "c++", "fortran"]},
      "external": {"path": "/usr", "module": null, "extra_attributes": {}}
    },
    "gmkaaaaaaaaa": {"name": "gmake", "version": "4.4.1", "external": null}
  }
}"#;

    #[test]
    fn parses_nodes_edges_externals_and_providers() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("spack.lock");
        std::fs::write(&path, LOCK).expect("write lock");

        let lock = load_lockfile(&path).expect("load lockfile");
        let g = &lock.graph;
        assert_eq!(g.len(), 3);
        assert_eq!(lock.root_specs, vec!["libelf%gcc".to_string()]);
        assert_eq!(lock.sha256, sha256_hex(LOCK.as_bytes()));

        let gcc = g.node("gccaaaaaaaaa").expect("gcc node");
        assert!(gcc.external);
        assert!(!g.node("gmkaaaaaaaaa").expect("gmake node").external);

        let elf = g.node("elfaaaaaaaaa").expect("libelf node");
        assert_eq!(elf.variants.get("shared"), Some(&VariantValue::Bool(true)));
        assert!(!elf.variants.contains_key("cflags"));

        assert_eq!(
            g.language_provider("elfaaaaaaaaa", CompilerSlot::C)
                .map(|n| n.name.as_str()),
            Some("gcc")
        );
        assert!(g.build_only_names().contains("gmake"));
        assert_eq!(g.roots().count(), 1);
    }

    #[test]
    fn legacy_dependency_maps_are_accepted() {
        let raw = r#"{
  "roots": [],
  "concrete_specs": {
    "a": {"name": "a", "version": "1", "dependencies": {"b": {"hash": "b", "type": ["build", "link"]}}},
    "b": {"name": "b", "version": "2"}
  }
}"#;
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("spack.lock");
        std::fs::write(&path, raw).expect("write lock");
        let g = LockfileGraphProvider::new(&path)
            .load_graph()
            .expect("load graph");
        let edge = g.incoming("b").next().expect("edge into b");
        assert!(edge.deptypes.contains(DepType::Link));
    }

    #[test]
    fn unknown_deptype_is_a_parse_failure() {
        let raw = r#"{"concrete_specs": {
    "a": {"name": "a", "version": "1", "dependencies": [{"name": "b", "hash": "b", "parameters": {"deptypes": ["weird"]}}]},
    "b": {"name": "b", "version": "2"}
}}"#;
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("spack.lock");
        std::fs::write(&path, raw).expect("write lock");
        let err = load_lockfile(&path).unwrap_err();
        assert_eq!(err.code(), "graph.invalid_dependency_type");
    }

    #[test]
    fn v4_list_dependencies_read_the_top_level_type() {
        let raw = r#"{
  "_meta": {"file-type": "spack-lockfile", "lockfile-version": 4, "specfile-version": 3},
  "roots": [
    {"hash": "appaaaaaaaaa", "spec": "app"},
    {"hash": "toolaaaaaaaa", "spec": "tool"}
  ],
  "concrete_specs": {
    "appaaaaaaaaa": {"name": "app", "version": "1.0", "dependencies": [
      {"name": "cmake", "hash": "cm1aaaaaaaaa", "type": ["build"]},
      {"name": "zlib", "hash": "zlbaaaaaaaaa", "type": ["build", "link"]}
    ]},
    "toolaaaaaaaa": {"name": "tool", "version": "2.0", "dependencies": [
      {"name": "cmake", "hash": "cm2aaaaaaaaa", "type": ["build"]}
    ]},
    "cm1aaaaaaaaa": {"name": "cmake", "version": "3.27.9"},
    "cm2aaaaaaaaa": {"name": "cmake", "version": "3.26.0"},
    "zlbaaaaaaaaa": {"name": "zlib", "version": "1.3.1"}
  }
}"#;
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("spack.lock");
        std::fs::write(&path, raw).expect("write lock");
        let g = load_lockfile(&path).expect("load lockfile").graph;

        let edge = g.incoming("cm1aaaaaaaaa").next().expect("edge into cmake");
        assert_eq!(edge.deptypes, DepTypes::BUILD);
        let edge = g.incoming("zlbaaaaaaaaa").next().expect("edge into zlib");
        assert!(edge.deptypes.contains(DepType::Link));

        let build_only = g.build_only_names();
        assert!(build_only.contains("cmake"));
        assert!(!build_only.contains("zlib"));
    }

    #[test]
    fn edge_without_dependency_types_is_rejected() {
        let raw = r#"{"concrete_specs": {
    "a": {"name": "a", "version": "1", "dependencies": [{"name": "b", "hash": "b"}]},
    "b": {"name": "b", "version": "2"}
}}"#;
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("spack.lock");
        std::fs::write(&path, raw).expect("write lock");
        let err = load_lockfile(&path).unwrap_err();
        assert_eq!(err.code(), "graph.missing_dependency_type");
    }

    #[test]
    fn missing_file_and_bad_json_have_distinct_codes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("spack.lock");
        assert_eq!(
            load_lockfile(&path).unwrap_err().code(),
            "graph.lockfile_read_failed"
        );
        std::fs::write(&path, "{not json").expect("write lock");
        assert_eq!(
            load_lockfile(&path).unwrap_err().code(),
            "graph.lockfile_parse_failed"
        );
    }
}
