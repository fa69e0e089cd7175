//! Arena form of FieldExpr DAGs, indexed by dense node ids.

use std::collections::HashMap;

use super::expr::{FieldExpr, FieldKind, NodeKey};
use crate::model::patch::{CombineMode, PortRef};
use crate::model::value::Value;

pub type FieldNodeId = usize;

#[derive(Clone, Debug, PartialEq)]
pub enum FieldIrNode {
    Const(Value),
    Index,
    Source(PortRef),
    Map {
        function: String,
        params: Vec<Value>,
        src: FieldNodeId,
    },
    Zip {
        function: String,
        params: Vec<Value>,
        a: FieldNodeId,
        b: FieldNodeId,
    },
    Adapter {
        function: String,
        src: FieldNodeId,
    },
    Combine {
        mode: CombineMode,
        terms: Vec<FieldNodeId>,
    },
}

/// Structurally de-duplicated node arena. Node ids are stable for the life of
/// the program, so handle caches can be indexed by them.
#[derive(Debug, Default)]
pub struct FieldProgram {
    nodes: Vec<FieldIrNode>,
    by_key: HashMap<NodeKey, FieldNodeId>,
}

enum Step<'e> {
    Enter(&'e FieldExpr),
    Exit(&'e FieldExpr),
}

impl FieldProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: FieldNodeId) -> Option<&FieldIrNode> {
        self.nodes.get(id)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.by_key.clear();
    }

    /// Every source referenced by the program, in node order. Nodes are
    /// unique, so each source appears once and earlier sources keep their
    /// position as the program grows.
    pub fn sources(&self) -> Vec<&PortRef> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                FieldIrNode::Source(port) => Some(port),
                _ => None,
            })
            .collect()
    }

    /// Flattens `expr` into the arena and returns the id of its root.
    /// Structurally equal sub-expressions share one id.
    pub fn lower(&mut self, expr: &FieldExpr) -> FieldNodeId {
        if let Some(id) = self.by_key.get(&expr.key()) {
            return *id;
        }

        let mut stack = vec![Step::Enter(expr)];
        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(node) => {
                    if self.by_key.contains_key(&node.key()) {
                        continue;
                    }
                    stack.push(Step::Exit(node));
                    for child in node.children().into_iter().rev() {
                        stack.push(Step::Enter(child));
                    }
                }
                Step::Exit(node) => {
                    if self.by_key.contains_key(&node.key()) {
                        continue;
                    }
                    let ir = self.flatten(node);
                    let id = self.nodes.len();
                    self.nodes.push(ir);
                    self.by_key.insert(node.key(), id);
                }
            }
        }

        self.by_key[&expr.key()]
    }

    /// Children are lowered before their parent, so their ids are known.
    fn flatten(&self, node: &FieldExpr) -> FieldIrNode {
        let id_of = |child: &FieldExpr| self.by_key[&child.key()];
        match node.kind() {
            FieldKind::Const(value) => FieldIrNode::Const(value.clone()),
            FieldKind::Domain => FieldIrNode::Index,
            FieldKind::Source(port) => FieldIrNode::Source(port.clone()),
            FieldKind::Map {
                function,
                params,
                src,
            } => FieldIrNode::Map {
                function: function.clone(),
                params: params.clone(),
                src: id_of(src),
            },
            FieldKind::Zip {
                function,
                params,
                a,
                b,
            } => FieldIrNode::Zip {
                function: function.clone(),
                params: params.clone(),
                a: id_of(a),
                b: id_of(b),
            },
            FieldKind::Adapter { function, src } => FieldIrNode::Adapter {
                function: function.clone(),
                src: id_of(src),
            },
            FieldKind::Bus {
                publishers,
                combine,
            } => FieldIrNode::Combine {
                mode: *combine,
                terms: publishers.iter().map(id_of).collect(),
            },
        }
    }
}
