//! Compiled nodes and their per-frame evaluation.

use std::fmt;
use std::sync::Arc;

use super::lowering::{BlockKernel, FrameContext, KernelInputs, ResolvedInputs};
use crate::core::bus;
use crate::core::field::FieldExpr;
use crate::core::output::{PortValue, PortValues};
use crate::core::state::{StateBlock, StateInputs, StateTable, evaluate_state_block};
use crate::error::LibraryError;
use crate::model::patch::{CombineMode, PortRef};
use crate::model::value::Value;

/// Output port under which a bus publishes its combined value.
pub const BUS_OUTPUT: &str = "value";

pub enum BlockEvaluator {
    /// A lowered catalog block.
    Pure(Box<dyn BlockKernel>),
    /// A registered state block. `defaults` holds configured values for
    /// unconnected inputs.
    Stateful {
        block: Arc<dyn StateBlock>,
        defaults: StateInputs,
    },
}

pub struct CompiledBlock {
    pub id: String,
    pub type_id: String,
    pub inputs: ResolvedInputs,
    pub outputs: Vec<String>,
    pub evaluator: BlockEvaluator,
    pub render_sink: bool,
}

impl fmt::Debug for CompiledBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledBlock")
            .field("id", &self.id)
            .field("type_id", &self.type_id)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("stateful", &self.is_stateful())
            .field("render_sink", &self.render_sink)
            .finish()
    }
}

impl CompiledBlock {
    pub fn is_stateful(&self) -> bool {
        matches!(self.evaluator, BlockEvaluator::Stateful { .. })
    }

    pub fn state_block(&self) -> Option<&Arc<dyn StateBlock>> {
        match &self.evaluator {
            BlockEvaluator::Stateful { block, .. } => Some(block),
            BlockEvaluator::Pure(_) => None,
        }
    }

    /// Runs the block for one frame.
    pub fn evaluate(
        &self,
        inputs: &KernelInputs,
        frame: &mut FrameContext,
        states: &mut StateTable,
    ) -> Result<PortValues, LibraryError> {
        match &self.evaluator {
            BlockEvaluator::Pure(kernel) => kernel.run(inputs, frame),
            BlockEvaluator::Stateful { block, defaults } => {
                let state_inputs = self.state_inputs(block.as_ref(), inputs, defaults)?;
                let memory = states.get_mut(&self.id)?;
                let outputs =
                    evaluate_state_block(block.as_ref(), memory, &state_inputs, frame.time)?;
                Ok(outputs
                    .into_iter()
                    .map(|(port, value)| (port, PortValue::Signal(value)))
                    .collect())
            }
        }
    }

    fn state_inputs(
        &self,
        block: &dyn StateBlock,
        inputs: &KernelInputs,
        defaults: &StateInputs,
    ) -> Result<StateInputs, LibraryError> {
        let mut state_inputs = StateInputs::new();
        for port in block.input_ports() {
            match inputs.get(port) {
                PortValue::Signal(value) => state_inputs.insert(port, value.clone()),
                PortValue::None => {
                    if let Some(value) = defaults.get(port) {
                        state_inputs.insert(port, value.clone());
                    }
                }
                other => {
                    return Err(LibraryError::evaluation(format!(
                        "state block '{}' input '{}' expects a signal, got a {}",
                        self.id,
                        port,
                        other.type_name()
                    )));
                }
            }
        }
        Ok(state_inputs)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledBus {
    pub id: String,
    pub combine: CombineMode,
    pub default: Value,
    /// Enabled publishers in ascending sort key, ties by block id.
    pub publishers: Vec<PortRef>,
}

impl CompiledBus {
    /// Combines the current publisher values. Signals combine eagerly; if any
    /// publisher carries a field the result is a lazy `bus` field node.
    pub fn evaluate<'v>(
        &self,
        read: impl Fn(&PortRef) -> Option<&'v PortValue>,
    ) -> Result<PortValue, LibraryError> {
        let values: Vec<&PortValue> = self
            .publishers
            .iter()
            .filter_map(|p| read(p))
            .filter(|v| !v.is_none())
            .collect();

        if values.iter().any(|v| matches!(v, PortValue::Field(_))) {
            let terms = values
                .iter()
                .map(|v| {
                    v.to_field().ok_or_else(|| {
                        LibraryError::evaluation(format!(
                            "bus '{}' cannot combine a {} with fields",
                            self.id,
                            v.type_name()
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(PortValue::Field(FieldExpr::bus(terms, self.combine)));
        }

        let signals = values
            .iter()
            .map(|v| {
                v.as_signal().cloned().ok_or_else(|| {
                    LibraryError::evaluation(format!(
                        "bus '{}' received a {} publisher",
                        self.id,
                        v.type_name()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PortValue::Signal(bus::combine(
            self.combine,
            &signals,
            &self.default,
        )?))
    }
}
