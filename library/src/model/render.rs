//! Opaque render tree produced once per frame.
//!
//! The engine never draws this tree; it only builds it in render sinks and hands
//! it to the host unmodified.

use serde::{Deserialize, Serialize};

use crate::model::value::{Color, Vec2};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShapeKind {
    Circle { radius: f64 },
    Rect { width: f64, height: f64 },
    Path { data: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RenderNode {
    Group {
        id: String,
        children: Vec<RenderNode>,
    },
    Shape {
        id: String,
        shape: ShapeKind,
        position: Vec2,
        #[serde(default)]
        fill: Color,
    },
    Effect {
        id: String,
        effect: String,
        #[serde(default)]
        params: serde_json::Value,
        child: Box<RenderNode>,
    },
}

impl RenderNode {
    pub fn group(id: impl Into<String>, children: Vec<RenderNode>) -> Self {
        RenderNode::Group {
            id: id.into(),
            children,
        }
    }

    /// The placeholder returned when a frame produced no render output.
    pub fn empty() -> Self {
        Self::group("root", Vec::new())
    }

    pub fn is_empty_group(&self) -> bool {
        matches!(self, RenderNode::Group { children, .. } if children.is_empty())
    }

    /// Counts every node in the tree, including `self`.
    pub fn node_count(&self) -> usize {
        match self {
            RenderNode::Group { children, .. } => {
                1 + children.iter().map(RenderNode::node_count).sum::<usize>()
            }
            RenderNode::Shape { .. } => 1,
            RenderNode::Effect { child, .. } => 1 + child.node_count(),
        }
    }
}
