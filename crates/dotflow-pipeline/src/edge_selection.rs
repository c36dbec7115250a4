//! Edge selection after a node completes.
//!
//! 1. Keep edges whose condition is empty or holds.
//! 2. Narrow to edges labelled with the outcome's preferred label, if any match.
//! 3. Narrow by the first suggested next id that matches an edge target.
//! 4. Pick the highest weight, then the smallest target id, then the smallest
//!    edge id.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use dotflow_dot::Edge;
use dotflow_types::{Context, Outcome, StageStatus};

use crate::condition::{check_condition, ConditionRuntime};

/// Context visible to edge conditions: the run context plus `node_outcomes`.
pub fn condition_context(context: &Context, node_outcomes: &BTreeMap<String, StageStatus>) -> Context {
    let mut scoped = context.clone();
    let outcomes = node_outcomes
        .iter()
        .map(|(id, status)| (id.clone(), serde_json::Value::String(status.as_str().to_string())))
        .collect();
    scoped.insert_raw("node_outcomes", serde_json::Value::Object(outcomes));
    scoped
}

fn is_eligible(edge: &Edge, runtime: &ConditionRuntime<'_>, context: &Context) -> bool {
    match edge.condition().map(str::trim).filter(|c| !c.is_empty()) {
        None => true,
        Some(condition) => match check_condition(condition, runtime, context) {
            Ok(holds) => holds,
            Err(err) => {
                tracing::warn!(edge = %edge.id, error = %err, "unparseable condition treated as false");
                false
            }
        },
    }
}

fn compare_edges(a: &Edge, b: &Edge) -> Ordering {
    b.weight()
        .partial_cmp(&a.weight())
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.to.cmp(&b.to))
        .then_with(|| a.id.cmp(&b.id))
}

/// Choose the next edge from `edges`, or `None` when no edge is eligible.
pub fn select_edge<'a>(
    edges: &[&'a Edge],
    outcome: &Outcome,
    context: &Context,
    node_outcomes: &BTreeMap<String, StageStatus>,
) -> Option<&'a Edge> {
    if edges.is_empty() {
        return None;
    }

    let runtime = ConditionRuntime {
        status: outcome.status.as_str(),
        preferred_label: outcome.label(),
    };
    let scoped = condition_context(context, node_outcomes);

    let mut candidates: Vec<&'a Edge> = edges
        .iter()
        .copied()
        .filter(|e| is_eligible(e, &runtime, &scoped))
        .collect();
    if candidates.is_empty() {
        return None;
    }

    if let Some(label) = outcome.label() {
        let by_label: Vec<_> = candidates
            .iter()
            .copied()
            .filter(|e| e.label() == Some(label))
            .collect();
        if !by_label.is_empty() {
            candidates = by_label;
        }
    }

    for suggested in &outcome.suggested_next_ids {
        let by_target: Vec<_> = candidates
            .iter()
            .copied()
            .filter(|e| &e.to == suggested)
            .collect();
        if !by_target.is_empty() {
            candidates = by_target;
            break;
        }
    }

    candidates.sort_by(|a, b| compare_edges(a, b));
    candidates.first().copied()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
