use crate::api::{NodeRef, Violation};
use crate::graph::{ConcreteGraph, PackageNode};
use std::collections::BTreeSet;

#[derive(Debug)]
pub struct ApprovedPackagesCheckResult {
    pub violations: Vec<Violation>,
    pub unauthorized: Vec<NodeRef>,
}

pub fn check_approved_packages<'g>(
    graph: &'g ConcreteGraph,
    approved: &BTreeSet<String>,
) -> Vec<&'g PackageNode> {
    graph
        .nodes()
        .filter(|node| !approved.contains(&node.name))
        .collect()
}

pub fn run_approved_packages_check(
    graph: &ConcreteGraph,
    approved: &BTreeSet<String>,
) -> ApprovedPackagesCheckResult {
    let unauthorized: Vec<NodeRef> = check_approved_packages(graph, approved)
        .into_iter()
        .map(NodeRef::from)
        .collect();
    let violations = unauthorized
        .iter()
        .map(|node| {
            Violation::blocking(
                "approved_packages.unapproved",
                format!("{node} is not an approved package"),
                Some(node.clone()),
                None,
            )
        })
        .collect();
    ApprovedPackagesCheckResult {
        violations,
        unauthorized,
    }
}
