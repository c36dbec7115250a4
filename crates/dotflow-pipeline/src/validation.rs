//! Graph validation: lint rules and diagnostics.
//!
//! Seven error rules guard the structure the engine relies on; two warning
//! rules flag likely authoring mistakes. Call [`validate`] for the full list
//! or [`validate_or_raise`] to turn any error into a [`DotflowError`].

use std::collections::{HashSet, VecDeque};

use serde::Serialize;

use dotflow_types::{DotflowError, Result};

use crate::condition::parse_condition;
use crate::graph::{NodeKind, PipelineGraph};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintResult {
    pub rule: String,
    pub severity: Severity,
    /// Graph id, node id, or edge id, depending on the rule.
    pub target: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LintResult {
    fn error(rule: &str, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            severity: Severity::Error,
            target: target.into(),
            message: message.into(),
        }
    }

    fn warning(rule: &str, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(rule, target, message)
        }
    }
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, graph: &PipelineGraph) -> Vec<LintResult>;
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct SingleStartRule;
impl LintRule for SingleStartRule {
    fn name(&self) -> &str {
        "graph.single_start"
    }
    fn apply(&self, graph: &PipelineGraph) -> Vec<LintResult> {
        let found = graph.nodes_of_kind(NodeKind::Start).len();
        if found == 1 {
            return vec![];
        }
        vec![LintResult::error(
            self.name(),
            graph.id(),
            format!("Exactly one start node is required (found {found})."),
        )]
    }
}

struct SingleExitRule;
impl LintRule for SingleExitRule {
    fn name(&self) -> &str {
        "graph.single_exit"
    }
    fn apply(&self, graph: &PipelineGraph) -> Vec<LintResult> {
        let found = graph.nodes_of_kind(NodeKind::Exit).len();
        if found == 1 {
            return vec![];
        }
        vec![LintResult::error(
            self.name(),
            graph.id(),
            format!("Exactly one exit node is required (found {found})."),
        )]
    }
}

struct StartNoIncomingRule;
impl LintRule for StartNoIncomingRule {
    fn name(&self) -> &str {
        "start.no_incoming"
    }
    fn apply(&self, graph: &PipelineGraph) -> Vec<LintResult> {
        match graph.nodes_of_kind(NodeKind::Start).first() {
            Some(start) if !graph.incoming_edges(&start.id).is_empty() => vec![LintResult::error(
                self.name(),
                start.id.clone(),
                "Start node must not have incoming edges.",
            )],
            _ => vec![],
        }
    }
}

struct ExitNoOutgoingRule;
impl LintRule for ExitNoOutgoingRule {
    fn name(&self) -> &str {
        "exit.no_outgoing"
    }
    fn apply(&self, graph: &PipelineGraph) -> Vec<LintResult> {
        match graph.nodes_of_kind(NodeKind::Exit).first() {
            Some(exit) if !graph.outgoing_edges(&exit.id).is_empty() => vec![LintResult::error(
                self.name(),
                exit.id.clone(),
                "Exit node must not have outgoing edges.",
            )],
            _ => vec![],
        }
    }
}

/// Emits both `edge.source_exists` and `edge.target_exists`.
struct EdgeEndpointsRule;
impl LintRule for EdgeEndpointsRule {
    fn name(&self) -> &str {
        "edge.endpoints"
    }
    fn apply(&self, graph: &PipelineGraph) -> Vec<LintResult> {
        let mut results = Vec::new();
        for edge in graph.edges() {
            if !graph.has_node(&edge.from) {
                results.push(LintResult::error(
                    "edge.source_exists",
                    edge.id.clone(),
                    format!("Edge source '{}' does not exist.", edge.from),
                ));
            }
            if !graph.has_node(&edge.to) {
                results.push(LintResult::error(
                    "edge.target_exists",
                    edge.id.clone(),
                    format!("Edge target '{}' does not exist.", edge.to),
                ));
            }
        }
        results
    }
}

struct ConditionValidRule;
impl LintRule for ConditionValidRule {
    fn name(&self) -> &str {
        "edge.condition_valid"
    }
    fn apply(&self, graph: &PipelineGraph) -> Vec<LintResult> {
        graph
            .edges()
            .iter()
            .filter_map(|edge| {
                let condition = edge.condition().filter(|c| !c.trim().is_empty())?;
                let err = parse_condition(condition).err()?;
                Some(LintResult::error(
                    self.name(),
                    edge.id.clone(),
                    format!("Invalid edge condition '{condition}': {err}"),
                ))
            })
            .collect()
    }
}

struct CodergenPromptRule;
impl LintRule for CodergenPromptRule {
    fn name(&self) -> &str {
        "codergen.prompt"
    }
    fn apply(&self, graph: &PipelineGraph) -> Vec<LintResult> {
        graph
            .nodes_of_kind(NodeKind::Codergen)
            .into_iter()
            .filter(|n| n.str_attr("prompt").map_or(true, |p| p.trim().is_empty()))
            .map(|n| {
                LintResult::warning(
                    self.name(),
                    n.id.clone(),
                    "Codergen node has empty prompt; runtime will fall back to node label.",
                )
            })
            .collect()
    }
}

struct ReachabilityRule;
impl LintRule for ReachabilityRule {
    fn name(&self) -> &str {
        "graph.reachability"
    }
    fn apply(&self, graph: &PipelineGraph) -> Vec<LintResult> {
        let Some(start) = graph.nodes_of_kind(NodeKind::Start).first().map(|n| n.id.clone()) else {
            return vec![];
        };

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::from([start.clone()]);
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }
            for edge in graph.outgoing_edges(&id) {
                if !visited.contains(&edge.to) {
                    queue.push_back(edge.to.clone());
                }
            }
        }

        graph
            .nodes()
            .filter(|n| !visited.contains(&n.id))
            .map(|n| {
                LintResult::warning(
                    self.name(),
                    n.id.clone(),
                    format!("Node '{}' is unreachable from start node '{start}'.", n.id),
                )
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn built_in_rules() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(SingleStartRule),
        Box::new(SingleExitRule),
        Box::new(StartNoIncomingRule),
        Box::new(ExitNoOutgoingRule),
        Box::new(EdgeEndpointsRule),
        Box::new(ConditionValidRule),
        Box::new(CodergenPromptRule),
        Box::new(ReachabilityRule),
    ]
}

/// Run all built-in lint rules and return the collected results.
pub fn validate(graph: &PipelineGraph) -> Vec<LintResult> {
    validate_with(graph, &[])
}

/// Run the built-in rules followed by `extra`.
pub fn validate_with(graph: &PipelineGraph, extra: &[Box<dyn LintRule>]) -> Vec<LintResult> {
    built_in_rules()
        .iter()
        .chain(extra.iter())
        .flat_map(|rule| rule.apply(graph))
        .collect()
}

/// Run all lint rules; return `Err` if any error-severity result is found.
pub fn validate_or_raise(graph: &PipelineGraph) -> Result<Vec<LintResult>> {
    let results = validate(graph);
    let errors: Vec<String> = results
        .iter()
        .filter(|r| r.severity == Severity::Error)
        .map(|r| format!("- [{}] {}: {}", r.rule, r.target, r.message))
        .collect();
    if !errors.is_empty() {
        return Err(DotflowError::ValidationError(format!(
            "Graph validation failed:\n{}",
            errors.join("\n")
        )));
    }
    Ok(results)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
