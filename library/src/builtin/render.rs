//! Render sinks.

use std::collections::BTreeMap;

use crate::core::compiler::lowering::{config_number, config_value};
use crate::core::compiler::{
    BlockKernel, FrameContext, KernelInputs, LoweredBlock, LoweringContext, ResolvedInputs,
};
use crate::core::field::FieldExpr;
use crate::core::output::{PortValue, PortValues};
use crate::error::LibraryError;
use crate::model::render::{RenderNode, ShapeKind};
use crate::model::value::{Color, Value, Vec2};

super::define_block!(
    RenderCirclesBlock,
    type_name: "render.circles",
    inputs: ["domain", "positions", "radius", "fill"]
);

impl RenderCirclesBlock {
    fn lower_block(
        &self,
        ctx: &LoweringContext,
        inputs: &ResolvedInputs,
        config: &serde_json::Value,
    ) -> Result<LoweredBlock, LibraryError> {
        if !inputs.is_connected("domain") {
            return Err(LibraryError::lowering(format!(
                "{} '{}': input 'domain' must be connected",
                ctx.type_id, ctx.block_id
            )));
        }
        let radius = config_number(config, "radius").unwrap_or(4.0);
        let fill = match config_value(config, "fill")? {
            Some(value) => value.as_color().ok_or_else(|| {
                LibraryError::lowering(format!(
                    "{} '{}': 'fill' must be a color",
                    ctx.type_id, ctx.block_id
                ))
            })?,
            None => Color::default(),
        };
        Ok(LoweredBlock::new(&["render"], CirclesKernel { radius, fill }).render_sink())
    }
}

/// One circle per domain element. Position, radius and fill are fields
/// materialized over the whole domain in one batch.
struct CirclesKernel {
    radius: f64,
    fill: Color,
}

impl CirclesKernel {
    fn field_or(inputs: &KernelInputs, port: &str, fallback: Value) -> Option<FieldExpr> {
        match inputs.get(port) {
            PortValue::None => Some(FieldExpr::constant(fallback)),
            value => value.to_field(),
        }
    }
}

impl BlockKernel for CirclesKernel {
    fn run(
        &self,
        inputs: &KernelInputs,
        frame: &mut FrameContext,
    ) -> Result<PortValues, LibraryError> {
        let domain = inputs.get("domain").as_domain().cloned().ok_or_else(|| {
            LibraryError::evaluation(format!("'{}' needs a domain", frame.block_id))
        })?;
        let center = Vec2::new(frame.runtime.width / 2.0, frame.runtime.height / 2.0);

        let mut columns = Vec::with_capacity(3);
        for (port, fallback) in [
            ("positions", Value::from(center)),
            ("radius", Value::from(self.radius)),
            ("fill", Value::from(self.fill)),
        ] {
            let field = Self::field_or(inputs, port, fallback).ok_or_else(|| {
                LibraryError::evaluation(format!(
                    "'{}' input '{}' got a {}",
                    frame.block_id,
                    port,
                    inputs.get(port).type_name()
                ))
            })?;
            columns.push(frame.materialize_field(&field, &domain)?);
        }

        let mut children = Vec::with_capacity(domain.len());
        for (index, element) in domain.elements().iter().enumerate() {
            let position = columns[0][index].as_vec2().ok_or_else(|| {
                LibraryError::evaluation(format!(
                    "'{}': position of '{}' is not a vec2",
                    frame.block_id, element
                ))
            })?;
            let radius = columns[1][index].as_f64().ok_or_else(|| {
                LibraryError::evaluation(format!(
                    "'{}': radius of '{}' is not a number",
                    frame.block_id, element
                ))
            })?;
            let fill = match &columns[2][index] {
                Value::Color(color) => *color,
                Value::Number(v) => Color::rgba(v.0, v.0, v.0, 1.0),
                other => {
                    return Err(LibraryError::evaluation(format!(
                        "'{}': fill of '{}' is a {}",
                        frame.block_id,
                        element,
                        other.type_name()
                    )));
                }
            };
            children.push(RenderNode::Shape {
                id: format!("{}:{}", frame.block_id, element),
                shape: ShapeKind::Circle { radius },
                position,
                fill,
            });
        }

        Ok(BTreeMap::from([(
            "render".to_string(),
            PortValue::Render(RenderNode::group(frame.block_id, children)),
        )]))
    }
}
