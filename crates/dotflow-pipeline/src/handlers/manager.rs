//! Manager loop handler for "house" shaped nodes.

use async_trait::async_trait;

use dotflow_types::{Outcome, Result};

use crate::handler::{HandlerContext, NodeHandler};

/// Handler for "stack.manager_loop" type nodes (shape="house").
/// Supervision of child pipelines is not modelled; the node passes through.
pub struct ManagerLoopHandler;

#[async_trait]
impl NodeHandler for ManagerLoopHandler {
    fn handler_type(&self) -> &str {
        "stack.manager_loop"
    }

    async fn execute(&self, ctx: &HandlerContext<'_>) -> Result<Outcome> {
        tracing::info!(node = %ctx.node.id, "manager loop pass-through");
        Ok(Outcome::success("stack manager loop node"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PipelineGraph;
    use dotflow_types::{Context, StageStatus};
    use std::path::Path;

    #[tokio::test]
    async fn manager_loop_passes_through() {
        let graph = PipelineGraph::new(dotflow_dot::parse("digraph G { boss [shape=house] }").unwrap());
        let ctx = HandlerContext {
            graph: &graph,
            node: graph.node("boss").unwrap(),
            context: &Context::new(),
            logs_root: Path::new("/tmp"),
            stage_dir: Path::new("/tmp"),
            outgoing_edges: &[],
        };
        let outcome = ManagerLoopHandler.execute(&ctx).await.unwrap();
        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.notes.as_deref(), Some("stack manager loop node"));
        assert!(outcome.context_updates.is_empty());
    }
}
