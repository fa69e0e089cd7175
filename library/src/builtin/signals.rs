//! Scalar signal blocks.

use std::collections::BTreeMap;

use crate::core::compiler::lowering::config_value;
use crate::core::compiler::{
    BlockKernel, FrameContext, KernelInputs, LoweredBlock, LoweringContext, ResolvedInputs,
};
use crate::core::field::{Arity, BinaryOp, FieldExpr};
use crate::core::output::{PortValue, PortValues};
use crate::error::LibraryError;
use crate::model::value::Value;

super::define_block!(ConstantBlock, type_name: "constant", inputs: []);

impl ConstantBlock {
    fn lower_block(
        &self,
        _ctx: &LoweringContext,
        _inputs: &ResolvedInputs,
        config: &serde_json::Value,
    ) -> Result<LoweredBlock, LibraryError> {
        let value = config_value(config, "value")?.unwrap_or_default();
        Ok(LoweredBlock::new(&["out"], ConstantKernel { value }))
    }
}

struct ConstantKernel {
    value: Value,
}

impl BlockKernel for ConstantKernel {
    fn run(
        &self,
        _inputs: &KernelInputs,
        _frame: &mut FrameContext,
    ) -> Result<PortValues, LibraryError> {
        Ok(BTreeMap::from([(
            "out".to_string(),
            PortValue::Signal(self.value.clone()),
        )]))
    }
}

super::define_block!(TimeBlock, type_name: "time", inputs: []);

impl TimeBlock {
    fn lower_block(
        &self,
        _ctx: &LoweringContext,
        _inputs: &ResolvedInputs,
        _config: &serde_json::Value,
    ) -> Result<LoweredBlock, LibraryError> {
        Ok(LoweredBlock::new(&["t", "dt", "frame"], TimeKernel))
    }
}

/// Exposes the frame's time context as signals.
struct TimeKernel;

impl BlockKernel for TimeKernel {
    fn run(
        &self,
        _inputs: &KernelInputs,
        frame: &mut FrameContext,
    ) -> Result<PortValues, LibraryError> {
        let time = frame.time;
        Ok(BTreeMap::from([
            ("t".to_string(), PortValue::from(Value::from(time.t))),
            ("dt".to_string(), PortValue::from(Value::from(time.dt))),
            (
                "frame".to_string(),
                PortValue::from(Value::from(time.frame as f64)),
            ),
        ]))
    }
}

super::define_block!(RelayBlock, type_name: "relay", inputs: ["in"]);

impl RelayBlock {
    fn lower_block(
        &self,
        _ctx: &LoweringContext,
        _inputs: &ResolvedInputs,
        config: &serde_json::Value,
    ) -> Result<LoweredBlock, LibraryError> {
        let fallback = config_value(config, "default")?.unwrap_or_default();
        Ok(LoweredBlock::new(&["out"], RelayKernel { fallback }))
    }
}

/// Forwards its input unchanged, whatever its kind.
struct RelayKernel {
    fallback: Value,
}

impl BlockKernel for RelayKernel {
    fn run(
        &self,
        inputs: &KernelInputs,
        _frame: &mut FrameContext,
    ) -> Result<PortValues, LibraryError> {
        let out = match inputs.get("in") {
            PortValue::None => PortValue::Signal(self.fallback.clone()),
            value => value.clone(),
        };
        Ok(BTreeMap::from([("out".to_string(), out)]))
    }
}

super::define_block!(AddBlock, type_name: "math.add", inputs: ["a", "b"]);

impl AddBlock {
    fn lower_block(
        &self,
        ctx: &LoweringContext,
        _inputs: &ResolvedInputs,
        _config: &serde_json::Value,
    ) -> Result<LoweredBlock, LibraryError> {
        ctx.require_function("add", Arity::Binary)?;
        Ok(LoweredBlock::new(
            &["out"],
            ArithmeticKernel {
                function: "add",
                op: BinaryOp::Add,
                identity: 0.0,
            },
        ))
    }
}

super::define_block!(MultiplyBlock, type_name: "math.multiply", inputs: ["a", "b"]);

impl MultiplyBlock {
    fn lower_block(
        &self,
        ctx: &LoweringContext,
        _inputs: &ResolvedInputs,
        _config: &serde_json::Value,
    ) -> Result<LoweredBlock, LibraryError> {
        ctx.require_function("mul", Arity::Binary)?;
        Ok(LoweredBlock::new(
            &["out"],
            ArithmeticKernel {
                function: "mul",
                op: BinaryOp::Mul,
                identity: 1.0,
            },
        ))
    }
}

/// Binary arithmetic over signals, or a lazy zip as soon as one operand is a
/// field. Unconnected operands take the operation's identity.
struct ArithmeticKernel {
    function: &'static str,
    op: BinaryOp,
    identity: f64,
}

impl ArithmeticKernel {
    fn operand(&self, inputs: &KernelInputs, port: &str) -> PortValue {
        match inputs.get(port) {
            PortValue::None => PortValue::Signal(Value::from(self.identity)),
            value => value.clone(),
        }
    }
}

impl BlockKernel for ArithmeticKernel {
    fn run(
        &self,
        inputs: &KernelInputs,
        frame: &mut FrameContext,
    ) -> Result<PortValues, LibraryError> {
        let a = self.operand(inputs, "a");
        let b = self.operand(inputs, "b");
        let out = match (&a, &b) {
            (PortValue::Signal(x), PortValue::Signal(y)) => {
                PortValue::Signal(self.op.apply(x, y, &[])?)
            }
            _ => match (a.to_field(), b.to_field()) {
                (Some(x), Some(y)) => {
                    PortValue::Field(FieldExpr::zip(self.function, Vec::new(), x, y))
                }
                _ => {
                    return Err(LibraryError::evaluation(format!(
                        "'{}' cannot {} a {} and a {}",
                        frame.block_id,
                        self.function,
                        a.type_name(),
                        b.type_name()
                    )));
                }
            },
        };
        Ok(BTreeMap::from([("out".to_string(), out)]))
    }
}
