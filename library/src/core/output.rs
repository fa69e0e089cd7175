//! Typed values carried on block ports during a frame.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::domain::Domain;
use crate::core::field::FieldExpr;
use crate::model::render::RenderNode;
use crate::model::value::Value;

/// The value produced on one output port.
#[derive(Clone, Debug, PartialEq)]
pub enum PortValue {
    /// One value per frame.
    Signal(Value),
    /// One value per domain element, computed lazily.
    Field(FieldExpr),
    Domain(Arc<Domain>),
    Render(RenderNode),
    /// Unconnected port, or a delayed source that has not produced yet.
    None,
}

impl PortValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            PortValue::Signal(_) => "signal",
            PortValue::Field(_) => "field",
            PortValue::Domain(_) => "domain",
            PortValue::Render(_) => "render",
            PortValue::None => "none",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, PortValue::None)
    }

    pub fn as_signal(&self) -> Option<&Value> {
        match self {
            PortValue::Signal(v) => Some(v),
            _ => None,
        }
    }

    /// Extract as number, returning default if not a numeric signal.
    pub fn as_number(&self, default: f64) -> f64 {
        self.as_signal().and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn as_domain(&self) -> Option<&Arc<Domain>> {
        match self {
            PortValue::Domain(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_field(&self) -> Option<&FieldExpr> {
        match self {
            PortValue::Field(f) => Some(f),
            _ => None,
        }
    }

    /// Lifts a signal to a constant field. Fields are returned unchanged.
    pub fn to_field(&self) -> Option<FieldExpr> {
        match self {
            PortValue::Field(f) => Some(f.clone()),
            PortValue::Signal(v) => Some(FieldExpr::constant(v.clone())),
            _ => None,
        }
    }

    pub fn into_render(self) -> Option<RenderNode> {
        match self {
            PortValue::Render(node) => Some(node),
            _ => None,
        }
    }
}

impl From<Value> for PortValue {
    fn from(value: Value) -> Self {
        PortValue::Signal(value)
    }
}

/// Outputs of one node, keyed by port name.
pub type PortValues = BTreeMap<String, PortValue>;
