use async_trait::async_trait;

use dotflow_types::{Outcome, Result};

use crate::handler::{HandlerContext, NodeHandler};

/// Handler for "parallel" type nodes (shape="component").
/// Branches are not forked; the run continues down a single selected edge.
pub struct ParallelHandler;

#[async_trait]
impl NodeHandler for ParallelHandler {
    fn handler_type(&self) -> &str {
        "parallel"
    }

    async fn execute(&self, ctx: &HandlerContext<'_>) -> Result<Outcome> {
        let targets: Vec<&str> = ctx.outgoing_edges.iter().map(|e| e.to.as_str()).collect();
        tracing::info!(
            node = %ctx.node.id,
            branches = targets.len(),
            targets = ?targets,
            "parallel node running sequentially"
        );
        Ok(Outcome::success("parallel node (sequential fallback)"))
    }
}

/// Handler for "parallel.fan_in" type nodes (shape="tripleoctagon").
pub struct FanInHandler;

#[async_trait]
impl NodeHandler for FanInHandler {
    fn handler_type(&self) -> &str {
        "parallel.fan_in"
    }

    async fn execute(&self, ctx: &HandlerContext<'_>) -> Result<Outcome> {
        tracing::info!(node = %ctx.node.id, "fan-in pass-through");
        Ok(Outcome::success("parallel fan-in node"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
