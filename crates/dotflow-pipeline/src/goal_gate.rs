use std::collections::BTreeMap;

use dotflow_dot::Node;
use dotflow_types::StageStatus;

use crate::graph::PipelineGraph;

/// First node flagged `goal_gate=true` whose recorded outcome is not
/// `success`. Nodes are scanned in id order.
pub fn find_unsatisfied_gate<'a>(
    graph: &'a PipelineGraph,
    node_outcomes: &BTreeMap<String, StageStatus>,
) -> Option<&'a Node> {
    graph.nodes().find(|node| {
        node.bool_attr("goal_gate", false)
            && node_outcomes.get(&node.id) != Some(&StageStatus::Success)
    })
}

/// Where to jump when `gate` is unsatisfied. Candidates, in order: node
/// `retry_target`, node `fallback_retry_target`, graph `retry_target`, graph
/// `fallback_retry_target`. The first that names an existing node wins.
pub fn resolve_retry_target(gate: &Node, graph: &PipelineGraph) -> Option<String> {
    [
        gate.str_attr("retry_target"),
        gate.str_attr("fallback_retry_target"),
        graph.str_attr("retry_target"),
        graph.str_attr("fallback_retry_target"),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .find(|target| !target.is_empty() && graph.has_node(target))
    .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(body: &str) -> PipelineGraph {
        PipelineGraph::new(dotflow_dot::parse(&format!("digraph G {{ {body} }}")).unwrap())
    }

    fn outcomes(pairs: &[(&str, StageStatus)]) -> BTreeMap<String, StageStatus> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn gate_requires_recorded_success() {
        let g = graph("impl [goal_gate=true]; other");
        assert_eq!(find_unsatisfied_gate(&g, &outcomes(&[])).map(|n| n.id.as_str()), Some("impl"));
        assert_eq!(
            find_unsatisfied_gate(&g, &outcomes(&[("impl", StageStatus::PartialSuccess)]))
                .map(|n| n.id.as_str()),
            Some("impl")
        );
        assert!(find_unsatisfied_gate(&g, &outcomes(&[("impl", StageStatus::Success)])).is_none());
    }

    #[test]
    fn non_gates_are_ignored() {
        let g = graph(r#"a [goal_gate=false]; b [goal_gate="true"]"#);
        let unsatisfied = find_unsatisfied_gate(&g, &outcomes(&[("a", StageStatus::Fail)]));
        assert_eq!(unsatisfied.map(|n| n.id.as_str()), Some("b"));
    }

    #[test]
    fn retry_target_fallback_chain() {
        let g = graph(
            r#"retry_target="plan"
               gate [goal_gate=true, retry_target="ghost", fallback_retry_target="fix"]
               plain [goal_gate=true]
               fix; plan"#,
        );
        assert_eq!(resolve_retry_target(g.node("gate").unwrap(), &g).as_deref(), Some("fix"));
        assert_eq!(resolve_retry_target(g.node("plain").unwrap(), &g).as_deref(), Some("plan"));
    }

    #[test]
    fn graph_fallback_and_none() {
        let g = graph(r#"fallback_retry_target="plan"; gate [goal_gate=true]; plan"#);
        assert_eq!(resolve_retry_target(g.node("gate").unwrap(), &g).as_deref(), Some("plan"));

        let g = graph(r#"retry_target="nowhere"; gate [goal_gate=true]"#);
        assert_eq!(resolve_retry_target(g.node("gate").unwrap(), &g), None);
    }
}
