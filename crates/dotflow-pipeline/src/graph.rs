//! Executable view of a parsed graph: node kinds, adjacency, start lookup.

use std::collections::HashMap;

use dotflow_dot::{Attrs, Edge, Graph, Node};

// ---------------------------------------------------------------------------
// NodeKind
// ---------------------------------------------------------------------------

/// Closed set of node behaviours. A node's kind comes from its `type`
/// attribute when that names a known kind, otherwise from its `shape`.
/// Anything unrecognised is `Codergen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Start,
    Exit,
    Codergen,
    WaitHuman,
    Conditional,
    Parallel,
    FanIn,
    Tool,
    ManagerLoop,
}

impl NodeKind {
    pub const ALL: [NodeKind; 9] = [
        NodeKind::Start,
        NodeKind::Exit,
        NodeKind::Codergen,
        NodeKind::WaitHuman,
        NodeKind::Conditional,
        NodeKind::Parallel,
        NodeKind::FanIn,
        NodeKind::Tool,
        NodeKind::ManagerLoop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Start => "start",
            NodeKind::Exit => "exit",
            NodeKind::Codergen => "codergen",
            NodeKind::WaitHuman => "wait.human",
            NodeKind::Conditional => "conditional",
            NodeKind::Parallel => "parallel",
            NodeKind::FanIn => "parallel.fan_in",
            NodeKind::Tool => "tool",
            NodeKind::ManagerLoop => "stack.manager_loop",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    pub fn from_shape(shape: &str) -> Self {
        match shape {
            "Mdiamond" => NodeKind::Start,
            "Msquare" => NodeKind::Exit,
            "hexagon" => NodeKind::WaitHuman,
            "diamond" => NodeKind::Conditional,
            "component" => NodeKind::Parallel,
            "tripleoctagon" => NodeKind::FanIn,
            "parallelogram" => NodeKind::Tool,
            "house" => NodeKind::ManagerLoop,
            _ => NodeKind::Codergen,
        }
    }

    pub fn of(node: &Node) -> Self {
        if let Some(kind) = node
            .str_attr("type")
            .filter(|t| !t.is_empty())
            .map(|t| Self::from_type_name(t).unwrap_or(NodeKind::Codergen))
        {
            return kind;
        }
        Self::from_shape(node.str_attr("shape").unwrap_or("box"))
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PipelineGraph
// ---------------------------------------------------------------------------

/// A transformed graph with edge indexes. Edges whose endpoints are missing
/// are kept so the validator can report them.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    graph: Graph,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
}

impl PipelineGraph {
    pub fn new(graph: Graph) -> Self {
        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, edge) in graph.edges.iter().enumerate() {
            outgoing.entry(edge.from.clone()).or_default().push(idx);
            incoming.entry(edge.to.clone()).or_default().push(idx);
        }
        Self {
            graph,
            outgoing,
            incoming,
        }
    }

    pub fn id(&self) -> &str {
        &self.graph.id
    }

    pub fn attrs(&self) -> &Attrs {
        &self.graph.attrs
    }

    pub fn str_attr(&self, key: &str) -> Option<&str> {
        self.graph.str_attr(key)
    }

    pub fn int_attr(&self, key: &str, default: i64) -> i64 {
        self.graph.int_attr(key, default)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.graph.nodes.get(id)
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.graph.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.nodes.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.graph.edges
    }

    /// Outgoing edges of `id` in declaration order.
    pub fn outgoing_edges(&self, id: &str) -> Vec<&Edge> {
        self.edges_at(&self.outgoing, id)
    }

    pub fn incoming_edges(&self, id: &str) -> Vec<&Edge> {
        self.edges_at(&self.incoming, id)
    }

    fn edges_at<'a>(&'a self, index: &HashMap<String, Vec<usize>>, id: &str) -> Vec<&'a Edge> {
        index
            .get(id)
            .map(|idxs| idxs.iter().map(|&i| &self.graph.edges[i]).collect())
            .unwrap_or_default()
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<&Node> {
        self.nodes().filter(|n| NodeKind::of(n) == kind).collect()
    }

    /// First start-kind node, else a node literally named `start` or `Start`.
    pub fn start_node(&self) -> Option<&Node> {
        self.nodes()
            .find(|n| NodeKind::of(n) == NodeKind::Start)
            .or_else(|| self.node("start"))
            .or_else(|| self.node("Start"))
    }
}
