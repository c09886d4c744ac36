use crate::api::{NodeRef, Violation};
use crate::graph::{CompilerSlot, ConcreteGraph, PackageNode};
use crate::spec::Spec;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

/// One compiler slot whose provider matched none of the allowed patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotFailure {
    pub slot: CompilerSlot,
    pub provider: NodeRef,
}

#[derive(Debug, Clone)]
pub struct DisallowedCompilerUse<'g> {
    pub node: &'g PackageNode,
    pub failures: Vec<SlotFailure>,
}

#[derive(Debug)]
pub struct AllowedCompilersCheckResult {
    pub violations: Vec<Violation>,
    pub patterns: Vec<Spec>,
    pub invalid_patterns: Vec<String>,
}

/// Parses compiler patterns, logging and dropping the ones that do not parse.
pub fn parse_patterns(raw: &[String]) -> (Vec<Spec>, Vec<String>) {
    let mut patterns = vec![];
    let mut invalid = vec![];
    for item in raw {
        match Spec::parse(item) {
            Ok(spec) => patterns.push(spec),
            Err(e) => {
                warn!(pattern = %item, code = e.code(), "skipping invalid compiler spec: {e}");
                invalid.push(item.clone());
            }
        }
    }
    (patterns, invalid)
}

/// Every node with at least one compiler slot whose provider satisfies none of `allowed`.
pub fn check_allowed_compilers<'g>(
    graph: &'g ConcreteGraph,
    allowed: &[Spec],
) -> Vec<DisallowedCompilerUse<'g>> {
    graph
        .nodes()
        .filter_map(|node| {
            let failures: Vec<SlotFailure> = graph
                .language_providers(&node.hash)
                .into_iter()
                .filter(|(_, provider)| {
                    let candidate = provider.as_spec();
                    !allowed.iter().any(|p| candidate.satisfies(p))
                })
                .map(|(slot, provider)| SlotFailure {
                    slot,
                    provider: NodeRef::from(provider),
                })
                .collect();
            (!failures.is_empty()).then_some(DisallowedCompilerUse { node, failures })
        })
        .collect()
}

pub fn run_allowed_compilers_check(
    graph: &ConcreteGraph,
    raw_patterns: &[String],
) -> AllowedCompilersCheckResult {
    let (patterns, invalid_patterns) = parse_patterns(raw_patterns);
    let violations = check_allowed_compilers(graph, &patterns)
        .into_iter()
        .map(|hit| {
            let node = NodeRef::from(hit.node);
            let using: Vec<String> = hit
                .failures
                .iter()
                .map(|f| format!("{} provider: {}", f.slot, f.provider))
                .collect();
            Violation::blocking(
                "allowed_compilers.disallowed",
                format!("{node} using {}", using.join(", ")),
                Some(node),
                Some(json!({ "failures": hit.failures })),
            )
        })
        .collect();
    AllowedCompilersCheckResult {
        violations,
        patterns,
        invalid_patterns,
    }
}
