use crate::api::{NodeRef, Violation};
use crate::graph::{ConcreteGraph, PackageNode};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug)]
pub struct DuplicatesCheckResult {
    pub violations: Vec<Violation>,
    /// Package name -> the distinct realizations found for it.
    pub duplicates: BTreeMap<String, Vec<NodeRef>>,
    pub ignored: BTreeSet<String>,
}

/// Names with two or more distinct content hashes, each with its nodes.
///
/// Nodes sharing a hash count once. With `ignore_build_only`, names that are
/// only ever reached through build edges anywhere in the graph are skipped.
pub fn check_duplicate_packages<'g>(
    graph: &'g ConcreteGraph,
    ignore: &BTreeSet<String>,
    ignore_build_only: bool,
) -> BTreeMap<String, Vec<&'g PackageNode>> {
    let mut skip = ignore.clone();
    if ignore_build_only {
        skip.extend(graph.build_only_names());
    }
    duplicates_outside(graph, &skip)
}

fn duplicates_outside<'g>(
    graph: &'g ConcreteGraph,
    skip: &BTreeSet<String>,
) -> BTreeMap<String, Vec<&'g PackageNode>> {
    let mut by_name: BTreeMap<&str, BTreeMap<&str, &PackageNode>> = BTreeMap::new();
    for node in graph.nodes() {
        if skip.contains(&node.name) {
            continue;
        }
        by_name
            .entry(node.name.as_str())
            .or_default()
            .entry(node.hash.as_str())
            .or_insert(node);
    }

    by_name
        .into_iter()
        .filter(|(_, hashes)| hashes.len() >= 2)
        .map(|(name, hashes)| (name.to_string(), hashes.into_values().collect()))
        .collect()
}

pub fn run_duplicates_check(
    graph: &ConcreteGraph,
    ignore: &BTreeSet<String>,
    ignore_build_only: bool,
) -> DuplicatesCheckResult {
    let mut ignored = ignore.clone();
    if ignore_build_only {
        let build_only = graph.build_only_names();
        debug!(count = build_only.len(), "ignoring build-only packages");
        ignored.extend(build_only);
    }

    let duplicates: BTreeMap<String, Vec<NodeRef>> = duplicates_outside(graph, &ignored)
        .into_iter()
        .map(|(name, nodes)| (name, nodes.into_iter().map(NodeRef::from).collect()))
        .collect();

    let violations = duplicates
        .iter()
        .map(|(name, nodes)| {
            let rendered: Vec<String> = nodes.iter().map(ToString::to_string).collect();
            Violation::blocking(
                "duplicates.found",
                format!(
                    "package {name} is realized {} times: {}",
                    nodes.len(),
                    rendered.join(", ")
                ),
                None,
                Some(json!({ "package": name, "nodes": nodes })),
            )
        })
        .collect();

    DuplicatesCheckResult {
        violations,
        duplicates,
        ignored,
    }
}
