//! Field construction blocks.
//!
//! Everything here only builds [`FieldExpr`] nodes, with the exception of
//! `field.sample`, which reads a single element back into a signal.

use std::collections::BTreeMap;

use crate::core::compiler::lowering::{config_number, config_value};
use crate::core::compiler::{
    BlockKernel, FrameContext, KernelInputs, LoweredBlock, LoweringContext, ResolvedInputs,
};
use crate::core::field::{Arity, FieldExpr};
use crate::core::output::{PortValue, PortValues};
use crate::error::LibraryError;
use crate::model::value::Value;

fn require_connected(
    ctx: &LoweringContext,
    inputs: &ResolvedInputs,
    port: &str,
) -> Result<(), LibraryError> {
    if inputs.is_connected(port) {
        Ok(())
    } else {
        Err(LibraryError::lowering(format!(
            "{} '{}': input '{}' must be connected",
            ctx.type_id, ctx.block_id, port
        )))
    }
}

fn config_function(
    ctx: &LoweringContext,
    config: &serde_json::Value,
    arity: Arity,
) -> Result<(String, Vec<Value>), LibraryError> {
    let name = config
        .get("function")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| {
            LibraryError::lowering(format!(
                "{} '{}': missing 'function' name",
                ctx.type_id, ctx.block_id
            ))
        })?;
    ctx.require_function(name, arity)?;
    let params = match config_value(config, "params")? {
        None => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(single) => vec![single],
    };
    Ok((name.to_string(), params))
}

fn field_input(
    inputs: &KernelInputs,
    port: &str,
    block_id: &str,
) -> Result<FieldExpr, LibraryError> {
    let value = inputs.get(port);
    value.to_field().ok_or_else(|| {
        LibraryError::evaluation(format!(
            "'{}' input '{}' expects a field or signal, got {}",
            block_id,
            port,
            value.type_name()
        ))
    })
}

fn single_output(port: &str, value: PortValue) -> PortValues {
    BTreeMap::from([(port.to_string(), value)])
}

super::define_block!(FieldIndexBlock, type_name: "field.index", inputs: []);

impl FieldIndexBlock {
    fn lower_block(
        &self,
        _ctx: &LoweringContext,
        _inputs: &ResolvedInputs,
        _config: &serde_json::Value,
    ) -> Result<LoweredBlock, LibraryError> {
        Ok(LoweredBlock::new(&["out"], IndexKernel))
    }
}

/// Field of element positions.
struct IndexKernel;

impl BlockKernel for IndexKernel {
    fn run(
        &self,
        _inputs: &KernelInputs,
        _frame: &mut FrameContext,
    ) -> Result<PortValues, LibraryError> {
        Ok(single_output("out", PortValue::Field(FieldExpr::domain())))
    }
}

super::define_block!(FieldMapBlock, type_name: "field.map", inputs: ["in"]);

impl FieldMapBlock {
    fn lower_block(
        &self,
        ctx: &LoweringContext,
        inputs: &ResolvedInputs,
        config: &serde_json::Value,
    ) -> Result<LoweredBlock, LibraryError> {
        require_connected(ctx, inputs, "in")?;
        let (function, params) = config_function(ctx, config, Arity::Unary)?;
        Ok(LoweredBlock::new(&["out"], MapKernel { function, params }))
    }
}

struct MapKernel {
    function: String,
    params: Vec<Value>,
}

impl BlockKernel for MapKernel {
    fn run(
        &self,
        inputs: &KernelInputs,
        frame: &mut FrameContext,
    ) -> Result<PortValues, LibraryError> {
        let src = field_input(inputs, "in", frame.block_id)?;
        Ok(single_output(
            "out",
            PortValue::Field(FieldExpr::map(&self.function, self.params.clone(), src)),
        ))
    }
}

super::define_block!(FieldZipBlock, type_name: "field.zip", inputs: ["a", "b"]);

impl FieldZipBlock {
    fn lower_block(
        &self,
        ctx: &LoweringContext,
        inputs: &ResolvedInputs,
        config: &serde_json::Value,
    ) -> Result<LoweredBlock, LibraryError> {
        require_connected(ctx, inputs, "a")?;
        require_connected(ctx, inputs, "b")?;
        let (function, params) = config_function(ctx, config, Arity::Binary)?;
        Ok(LoweredBlock::new(&["out"], ZipKernel { function, params }))
    }
}

struct ZipKernel {
    function: String,
    params: Vec<Value>,
}

impl BlockKernel for ZipKernel {
    fn run(
        &self,
        inputs: &KernelInputs,
        frame: &mut FrameContext,
    ) -> Result<PortValues, LibraryError> {
        let a = field_input(inputs, "a", frame.block_id)?;
        let b = field_input(inputs, "b", frame.block_id)?;
        Ok(single_output(
            "out",
            PortValue::Field(FieldExpr::zip(&self.function, self.params.clone(), a, b)),
        ))
    }
}

super::define_block!(FieldBroadcastBlock, type_name: "field.broadcast", inputs: ["value"]);

impl FieldBroadcastBlock {
    fn lower_block(
        &self,
        _ctx: &LoweringContext,
        _inputs: &ResolvedInputs,
        config: &serde_json::Value,
    ) -> Result<LoweredBlock, LibraryError> {
        let fallback = config_value(config, "value")?.unwrap_or_default();
        Ok(LoweredBlock::new(&["out"], BroadcastKernel { fallback }))
    }
}

/// Repeats a signal for every element.
struct BroadcastKernel {
    fallback: Value,
}

impl BlockKernel for BroadcastKernel {
    fn run(
        &self,
        inputs: &KernelInputs,
        frame: &mut FrameContext,
    ) -> Result<PortValues, LibraryError> {
        let value = match inputs.get("value") {
            PortValue::None => self.fallback.clone(),
            PortValue::Signal(value) => value.clone(),
            other => {
                return Err(LibraryError::evaluation(format!(
                    "'{}' can only broadcast a signal, got {}",
                    frame.block_id,
                    other.type_name()
                )));
            }
        };
        Ok(single_output(
            "out",
            PortValue::Field(FieldExpr::constant(value)),
        ))
    }
}

super::define_block!(FieldSampleBlock, type_name: "field.sample", inputs: ["field", "domain"]);

impl FieldSampleBlock {
    fn lower_block(
        &self,
        ctx: &LoweringContext,
        inputs: &ResolvedInputs,
        config: &serde_json::Value,
    ) -> Result<LoweredBlock, LibraryError> {
        require_connected(ctx, inputs, "field")?;
        require_connected(ctx, inputs, "domain")?;
        let index = match config_number(config, "index") {
            None => 0,
            Some(n) if n >= 0.0 && n.fract() == 0.0 => n as usize,
            Some(n) => {
                return Err(LibraryError::lowering(format!(
                    "{} '{}': 'index' must be a non-negative integer, got {}",
                    ctx.type_id, ctx.block_id, n
                )));
            }
        };
        Ok(LoweredBlock::new(&["out"], SampleKernel { index }))
    }
}

/// Reads one element of a field through the lazy evaluator.
struct SampleKernel {
    index: usize,
}

impl BlockKernel for SampleKernel {
    fn run(
        &self,
        inputs: &KernelInputs,
        frame: &mut FrameContext,
    ) -> Result<PortValues, LibraryError> {
        let field = field_input(inputs, "field", frame.block_id)?;
        let domain = inputs.get("domain").as_domain().cloned().ok_or_else(|| {
            LibraryError::evaluation(format!("'{}' needs a domain", frame.block_id))
        })?;
        let element = domain.element_at(self.index).cloned().ok_or_else(|| {
            LibraryError::evaluation(format!(
                "'{}': index {} is outside domain '{}' of {} elements",
                frame.block_id,
                self.index,
                domain.id(),
                domain.len()
            ))
        })?;
        let value = frame.evaluate_element(&field, &domain, &element)?;
        Ok(single_output("out", PortValue::Signal(value)))
    }
}
