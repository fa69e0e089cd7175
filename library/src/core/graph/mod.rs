//! Dependency graph over blocks and buses.
//!
//! Edges leaving a state block (and listen edges entering one) are marked
//! `through_state`: they carry last frame's value, so they neither order the
//! schedule nor make a cycle illegal.

mod cycles;
mod topology;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::LibraryError;

pub use cycles::Cycle;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    Block { is_state: bool },
    Bus,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    /// Nodes that must run before this one in the same frame.
    pub dependencies: BTreeSet<String>,
}

impl GraphNode {
    pub fn is_state_block(&self) -> bool {
        matches!(self.kind, NodeKind::Block { is_state: true })
    }
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Connection,
    Publish,
    Listen,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    pub through_state: bool,
}

#[derive(Serialize, Clone, Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block_node(&mut self, id: &str, is_state_block: bool) -> Result<(), LibraryError> {
        self.add_node(id, NodeKind::Block {
            is_state: is_state_block,
        })
    }

    pub fn add_bus_node(&mut self, id: &str) -> Result<(), LibraryError> {
        self.add_node(id, NodeKind::Bus)
    }

    fn add_node(&mut self, id: &str, kind: NodeKind) -> Result<(), LibraryError> {
        if self.nodes.contains_key(id) {
            return Err(LibraryError::graph(format!("duplicate node id '{}'", id)));
        }
        self.nodes.insert(
            id.to_string(),
            GraphNode {
                id: id.to_string(),
                kind,
                dependencies: BTreeSet::new(),
            },
        );
        Ok(())
    }

    /// `from.port → to.port`; delayed when `from` is a state block.
    pub fn add_connection_edge(&mut self, from: &str, to: &str) -> Result<(), LibraryError> {
        let through_state = self.require(from)?.is_state_block();
        self.require(to)?;
        self.add_edge(from, to, EdgeKind::Connection, through_state);
        Ok(())
    }

    /// `block → bus`; delayed when the publisher is a state block.
    pub fn add_publish_edge(&mut self, block: &str, bus: &str) -> Result<(), LibraryError> {
        let through_state = self.require(block)?.is_state_block();
        self.require_bus(bus)?;
        self.add_edge(block, bus, EdgeKind::Publish, through_state);
        Ok(())
    }

    /// `bus → block`; delayed when the listener is a state block.
    pub fn add_listen_edge(&mut self, bus: &str, block: &str) -> Result<(), LibraryError> {
        self.require_bus(bus)?;
        let through_state = self.require(block)?.is_state_block();
        self.add_edge(bus, block, EdgeKind::Listen, through_state);
        Ok(())
    }

    fn add_edge(&mut self, from: &str, to: &str, kind: EdgeKind, through_state: bool) {
        if !through_state
            && let Some(node) = self.nodes.get_mut(to)
        {
            node.dependencies.insert(from.to_string());
        }
        self.edges.push(GraphEdge {
            from: from.to_string(),
            to: to.to_string(),
            kind,
            through_state,
        });
    }

    fn require(&self, id: &str) -> Result<&GraphNode, LibraryError> {
        self.nodes
            .get(id)
            .ok_or_else(|| LibraryError::graph(format!("node '{}' not found", id)))
    }

    fn require_bus(&self, id: &str) -> Result<&GraphNode, LibraryError> {
        match self.nodes.get(id) {
            Some(node) if node.kind == NodeKind::Bus => Ok(node),
            Some(_) => Err(LibraryError::graph(format!("node '{}' is not a bus", id))),
            None => Err(LibraryError::graph(format!("bus '{}' not found", id))),
        }
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// All node ids in ascending order.
    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Same-frame dependencies of `id`, ascending.
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.nodes
            .get(id)
            .map(|n| n.dependencies.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Nodes that depend on `id` in the same frame, ascending.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.dependencies.contains(id))
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Outgoing edge indices per node, in insertion order.
    fn adjacency(&self, include_delayed: bool) -> BTreeMap<&str, Vec<usize>> {
        let mut adj: BTreeMap<&str, Vec<usize>> =
            self.nodes.keys().map(|id| (id.as_str(), Vec::new())).collect();
        for (index, edge) in self.edges.iter().enumerate() {
            if (include_delayed || !edge.through_state)
                && let Some(out) = adj.get_mut(edge.from.as_str())
            {
                out.push(index);
            }
        }
        adj
    }
}
