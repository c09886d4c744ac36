use crate::api::{NodeRef, Violation};
use crate::graph::{ConcreteGraph, PackageNode};
use serde_json::json;
use std::collections::BTreeSet;

#[derive(Debug)]
pub struct CompilerUsageCheckResult {
    pub violations: Vec<Violation>,
    pub offenders: Vec<NodeRef>,
}

/// Nodes outside `allowed` that get any compiler slot from a package named
/// `restricted`. Allowed names are skipped outright, including a compiler
/// package that is itself listed.
pub fn check_compiler_usage<'g>(
    graph: &'g ConcreteGraph,
    restricted: &str,
    allowed: &BTreeSet<String>,
) -> Vec<&'g PackageNode> {
    graph
        .nodes()
        .filter(|node| !allowed.contains(&node.name))
        .filter(|node| {
            graph
                .language_providers(&node.hash)
                .iter()
                .any(|(_, provider)| provider.name == restricted)
        })
        .collect()
}

pub fn run_compiler_usage_check(
    graph: &ConcreteGraph,
    restricted: &str,
    allowed: &BTreeSet<String>,
) -> CompilerUsageCheckResult {
    let offenders: Vec<NodeRef> = check_compiler_usage(graph, restricted, allowed)
        .into_iter()
        .map(NodeRef::from)
        .collect();
    let violations = offenders
        .iter()
        .map(|node| {
            Violation::blocking(
                "compiler_usage.not_allowed",
                format!("{node} uses compiler {restricted} but is not in the allowed list"),
                Some(node.clone()),
                Some(json!({ "compiler": restricted })),
            )
        })
        .collect();
    CompilerUsageCheckResult {
        violations,
        offenders,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DepType, DepTypes};

    fn graph() -> ConcreteGraph {
        ConcreteGraph::builder()
            .root(PackageNode::new("libdwarf", "0.9", "dwfaaaaaaaaa"))
            .node(PackageNode::new("libelf", "0.8.13", "elfaaaaaaaaa"))
            .node(PackageNode::new("gmake", "4.4.1", "gmkaaaaaaaaa"))
            .node(PackageNode::new("gcc", "11.2.0", "gccaaaaaaaaa").external(true))
            .node(PackageNode::new("llvm", "17.0.6", "llvaaaaaaaaa").external(true))
            .edge("dwfaaaaaaaaa", "elfaaaaaaaaa", DepTypes::of(&[DepType::Link]), &[])
            .edge("dwfaaaaaaaaa", "gccaaaaaaaaa", DepTypes::BUILD, &["c"])
            .edge("dwfaaaaaaaaa", "llvaaaaaaaaa", DepTypes::BUILD, &["cxx"])
            .edge("elfaaaaaaaaa", "gccaaaaaaaaa", DepTypes::BUILD, &["c", "cxx"])
            .edge("dwfaaaaaaaaa", "gmkaaaaaaaaa", DepTypes::BUILD, &[])
            .build()
            .expect("build graph")
    }

    #[test]
    fn consumers_of_the_restricted_compiler_are_reported_once() {
        let g = graph();
        let allowed = BTreeSet::from(["gmake".to_string()]);
        let names: Vec<&str> = check_compiler_usage(&g, "gcc", &allowed)
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(names, vec!["libdwarf", "libelf"]);
    }

    #[test]
    fn allowed_names_and_other_providers_are_not_reported() {
        let g = graph();
        let allowed = BTreeSet::from(["libelf".to_string()]);
        let r = run_compiler_usage_check(&g, "llvm", &allowed);
        assert_eq!(r.offenders.len(), 1);
        assert_eq!(r.offenders[0].name, "libdwarf");

        let allowed = BTreeSet::from(["libelf".to_string(), "libdwarf".to_string()]);
        assert!(check_compiler_usage(&g, "gcc", &allowed).is_empty());
        assert!(check_compiler_usage(&g, "intel", &BTreeSet::new()).is_empty());
    }
}
