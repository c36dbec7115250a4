//! Node handler trait, execution context, and handler registry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use dotflow_dot::{Edge, Node};
use dotflow_types::{Context, Outcome, Result};

use crate::backend::CodergenBackend;
use crate::graph::{NodeKind, PipelineGraph};
use crate::handlers::{
    CodergenHandler, FanInHandler, ManagerLoopHandler, ParallelHandler, ToolHandler,
    WaitHumanHandler,
};
use crate::interviewer::Interviewer;

// ---------------------------------------------------------------------------
// HandlerContext
// ---------------------------------------------------------------------------

/// Everything a handler may look at for one attempt. Handlers never mutate
/// the run context directly; they return `context_updates` instead.
pub struct HandlerContext<'a> {
    pub graph: &'a PipelineGraph,
    pub node: &'a Node,
    pub context: &'a Context,
    pub logs_root: &'a Path,
    /// `<logs_root>/<node_id>`, created before the handler runs.
    pub stage_dir: &'a Path,
    pub outgoing_edges: &'a [&'a Edge],
}

// ---------------------------------------------------------------------------
// NodeHandler trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// The handler type identifier (e.g. "start", "exit", "codergen").
    fn handler_type(&self) -> &str;

    /// Execute one attempt for `ctx.node`.
    async fn execute(&self, ctx: &HandlerContext<'_>) -> Result<Outcome>;
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// One handler per [`NodeKind`]. Lookups for a kind with no registered
/// handler fall back to the codergen handler.
pub struct HandlerRegistry {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: NodeKind, handler: impl NodeHandler + 'static) {
        self.handlers.insert(kind, Arc::new(handler));
    }

    pub fn register_arc(&mut self, kind: NodeKind, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeHandler>> {
        self.handlers
            .get(&kind)
            .or_else(|| self.handlers.get(&NodeKind::Codergen))
            .cloned()
    }

    /// Handler for `node`, resolved through its kind.
    pub fn resolve(&self, node: &Node) -> Option<Arc<dyn NodeHandler>> {
        self.get(NodeKind::of(node))
    }

    pub fn has(&self, kind: NodeKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Built-in handlers
// ---------------------------------------------------------------------------

pub struct StartHandler;

#[async_trait]
impl NodeHandler for StartHandler {
    fn handler_type(&self) -> &str {
        "start"
    }

    async fn execute(&self, _ctx: &HandlerContext<'_>) -> Result<Outcome> {
        Ok(Outcome::success("start node"))
    }
}

pub struct ExitHandler;

#[async_trait]
impl NodeHandler for ExitHandler {
    fn handler_type(&self) -> &str {
        "exit"
    }

    async fn execute(&self, _ctx: &HandlerContext<'_>) -> Result<Outcome> {
        Ok(Outcome::success("exit node"))
    }
}

pub struct ConditionalHandler;

#[async_trait]
impl NodeHandler for ConditionalHandler {
    fn handler_type(&self) -> &str {
        "conditional"
    }

    async fn execute(&self, _ctx: &HandlerContext<'_>) -> Result<Outcome> {
        Ok(Outcome::success("conditional pass-through"))
    }
}

// ---------------------------------------------------------------------------
// Default registry factory
// ---------------------------------------------------------------------------

/// A registry with a handler for every node kind.
pub fn default_registry(
    interviewer: Arc<dyn Interviewer>,
    backend: Arc<dyn CodergenBackend>,
) -> HandlerRegistry {
    let mut reg = HandlerRegistry::new();
    reg.register(NodeKind::Start, StartHandler);
    reg.register(NodeKind::Exit, ExitHandler);
    reg.register(NodeKind::Conditional, ConditionalHandler);
    reg.register(NodeKind::Codergen, CodergenHandler::new(backend));
    reg.register(NodeKind::WaitHuman, WaitHumanHandler::new(interviewer));
    reg.register(NodeKind::Tool, ToolHandler::default());
    reg.register(NodeKind::Parallel, ParallelHandler);
    reg.register(NodeKind::FanIn, FanInHandler);
    reg.register(NodeKind::ManagerLoop, ManagerLoopHandler);
    reg
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::EchoBackend;
    use crate::interviewer::AutoApproveInterviewer;
    use dotflow_types::StageStatus;

    fn graph(dot: &str) -> PipelineGraph {
        PipelineGraph::new(dotflow_dot::parse(dot).unwrap())
    }

    async fn run(handler: &dyn NodeHandler, graph: &PipelineGraph, id: &str) -> Outcome {
        let node = graph.node(id).unwrap();
        let edges = graph.outgoing_edges(id);
        let ctx = HandlerContext {
            graph,
            node,
            context: &Context::new(),
            logs_root: Path::new("/tmp"),
            stage_dir: Path::new("/tmp"),
            outgoing_edges: &edges,
        };
        handler.execute(&ctx).await.unwrap()
    }

    #[tokio::test]
    async fn pass_through_handlers_succeed() {
        let g = graph("digraph G { s [shape=Mdiamond]; e [shape=Msquare]; c [shape=diamond]; s -> c -> e }");
        let start = run(&StartHandler, &g, "s").await;
        assert_eq!(start.status, StageStatus::Success);
        assert_eq!(start.notes.as_deref(), Some("start node"));
        assert_eq!(run(&ExitHandler, &g, "e").await.notes.as_deref(), Some("exit node"));
        assert_eq!(
            run(&ConditionalHandler, &g, "c").await.notes.as_deref(),
            Some("conditional pass-through")
        );
    }

    #[test]
    fn default_registry_covers_every_kind() {
        let reg = default_registry(Arc::new(AutoApproveInterviewer), Arc::new(EchoBackend));
        for kind in NodeKind::ALL {
            assert!(reg.has(kind), "missing handler for {kind}");
            assert_eq!(reg.get(kind).unwrap().handler_type(), kind.as_str());
        }
    }

    #[test]
    fn resolve_uses_node_kind() {
        let reg = default_registry(Arc::new(AutoApproveInterviewer), Arc::new(EchoBackend));
        let g = graph(r#"digraph G { h [shape=hexagon]; t [type="tool"]; odd [type="mystery"]; plain }"#);
        let resolved = |id: &str| reg.resolve(g.node(id).unwrap()).unwrap().handler_type().to_string();
        assert_eq!(resolved("h"), "wait.human");
        assert_eq!(resolved("t"), "tool");
        assert_eq!(resolved("odd"), "codergen");
        assert_eq!(resolved("plain"), "codergen");
    }

    #[test]
    fn missing_kind_falls_back_to_codergen() {
        let mut reg = HandlerRegistry::new();
        assert!(reg.get(NodeKind::Tool).is_none());
        reg.register(NodeKind::Codergen, CodergenHandler::new(Arc::new(EchoBackend)));
        assert!(!reg.has(NodeKind::Tool));
        assert_eq!(reg.get(NodeKind::Tool).unwrap().handler_type(), "codergen");
    }
}
