use crate::api::{NodeRef, Violation};
use crate::config::PackageEntry;
use crate::graph::{ConcreteGraph, PackageNode};
use indexmap::IndexMap;
use tracing::debug;

#[derive(Debug)]
pub struct BuildableCheckResult {
    pub violations: Vec<Violation>,
    pub offenders: Vec<NodeRef>,
}

/// Nodes built locally although their package is configured `buildable: false`.
///
/// Only an explicit per-package `false` counts; `packages: all:` defaults are
/// not consulted.
pub fn check_buildable_configuration<'g>(
    graph: &'g ConcreteGraph,
    packages: &IndexMap<String, PackageEntry>,
) -> Vec<&'g PackageNode> {
    graph
        .nodes()
        .filter(|node| {
            let buildable = packages
                .get(&node.name)
                .and_then(PackageEntry::settings)
                .and_then(|s| s.buildable);
            match (buildable, node.external) {
                (Some(false), false) => {
                    debug!(package = %node.name, "buildable:false but being built");
                    true
                }
                (Some(false), true) => {
                    debug!(package = %node.name, "buildable:false and using external");
                    false
                }
                _ => false,
            }
        })
        .collect()
}

pub fn run_buildable_check(
    graph: &ConcreteGraph,
    packages: &IndexMap<String, PackageEntry>,
) -> BuildableCheckResult {
    let offenders: Vec<NodeRef> = check_buildable_configuration(graph, packages)
        .into_iter()
        .map(NodeRef::from)
        .collect();
    let violations = offenders
        .iter()
        .map(|node| {
            Violation::blocking(
                "buildable.built_unbuildable",
                format!("{node} is configured buildable:false but is built from source"),
                Some(node.clone()),
                None,
            )
        })
        .collect();
    BuildableCheckResult {
        violations,
        offenders,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    fn packages(yaml: &str) -> IndexMap<String, PackageEntry> {
        let value: Value = serde_yaml::from_str(yaml).expect("yaml");
        value
            .as_mapping()
            .expect("mapping")
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().expect("string key").to_string(),
                    PackageEntry::from_value(v),
                )
            })
            .collect()
    }

    fn graph(foo_external: bool) -> ConcreteGraph {
        ConcreteGraph::builder()
            .root(PackageNode::new("foo", "1.0", "fooaaaaaaaaa").external(foo_external))
            .node(PackageNode::new("bar", "2.0", "baraaaaaaaaa"))
            .build()
            .expect("build graph")
    }

    #[test]
    fn built_unbuildable_package_is_a_violation() {
        let cfg = packages("foo: {buildable: false}\nbar: {buildable: true}\n");
        let names: Vec<_> = check_buildable_configuration(&graph(false), &cfg)
            .iter()
            .map(|n| n.name.clone())
            .collect();
        assert_eq!(names, vec!["foo"]);
        assert!(check_buildable_configuration(&graph(true), &cfg).is_empty());
    }

    #[test]
    fn missing_key_and_all_defaults_are_not_violations() {
        let cfg = packages("all: {buildable: false}\nfoo: {require: '@1.0'}\n");
        let r = run_buildable_check(&graph(false), &cfg);
        assert!(r.violations.is_empty());
    }
}
