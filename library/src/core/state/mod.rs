//! Explicit state blocks.
//!
//! A state block never hides memory in itself: its state lives in a
//! [`StateMemory`] allocated from the block's [`StateShape`] and owned by the
//! program's [`StateTable`]. Scrubbing therefore stays a pure function of time,
//! graph and state.

pub mod memory;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::core::time::{TimeContext, TimeMode};
use crate::error::LibraryError;
use crate::model::value::Value;

pub use memory::{StateFieldSpec, StateFieldType, StateMemory, StateShape, StateTable};

/// What a state block does with its memory while time is scrubbed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScrubPolicy {
    /// Keep the state frozen.
    #[default]
    Hold,
    /// Re-initialize from the shape.
    Reset,
    Interpolate,
    /// Rebuild the state from the target time.
    Recompute,
}

/// Signal inputs of one state block evaluation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateInputs {
    values: BTreeMap<String, Value>,
}

impl StateInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, port: &str, value: Value) -> Self {
        self.insert(port, value);
        self
    }

    pub fn insert(&mut self, port: &str, value: Value) {
        self.values.insert(port.to_string(), value);
    }

    pub fn get(&self, port: &str) -> Option<&Value> {
        self.values.get(port)
    }

    pub fn number(&self, port: &str, default: f64) -> f64 {
        self.get(port).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn flag(&self, port: &str) -> bool {
        self.get(port).and_then(Value::as_bool).unwrap_or(false)
    }
}

pub type StateOutputs = BTreeMap<String, Value>;

pub trait StateBlock: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn state_shape(&self) -> StateShape;

    fn scrub_policy(&self) -> ScrubPolicy {
        ScrubPolicy::Hold
    }

    fn input_ports(&self) -> &'static [&'static str];

    fn output_ports(&self) -> &'static [&'static str];

    fn init_state(&self, frame: u64) -> StateMemory {
        StateMemory::from_shape(&self.state_shape(), frame)
    }

    /// Advances the state by one performance frame.
    fn update_state(
        &self,
        state: &mut StateMemory,
        inputs: &StateInputs,
        ctx: &TimeContext,
    ) -> Result<(), LibraryError>;

    /// Reads outputs from the state. Must not change it.
    fn compute_outputs(
        &self,
        state: &StateMemory,
        inputs: &StateInputs,
        ctx: &TimeContext,
    ) -> Result<StateOutputs, LibraryError>;

    /// Rebuilds the state for `target_time` while scrubbing. Only called for
    /// the `interpolate` and `recompute` policies.
    fn reconstruct_state(
        &self,
        _state: &mut StateMemory,
        _target_time: f64,
        _ctx: &TimeContext,
    ) -> Result<(), LibraryError> {
        Err(LibraryError::evaluation(format!(
            "state block '{}' cannot reconstruct its state",
            self.type_name()
        )))
    }
}

/// Runs one frame of a state block under its scrub policy.
pub fn evaluate_state_block(
    block: &dyn StateBlock,
    state: &mut StateMemory,
    inputs: &StateInputs,
    ctx: &TimeContext,
) -> Result<StateOutputs, LibraryError> {
    match (ctx.mode, block.scrub_policy()) {
        (TimeMode::Performance, _) => block.update_state(state, inputs, ctx)?,
        (TimeMode::Scrub, ScrubPolicy::Hold) => {}
        (TimeMode::Scrub, ScrubPolicy::Reset) => *state = block.init_state(ctx.frame),
        (TimeMode::Scrub, ScrubPolicy::Interpolate | ScrubPolicy::Recompute) => {
            block.reconstruct_state(state, ctx.t, ctx)?
        }
    }
    trace!("{} at frame {} ({:?})", block.type_name(), ctx.frame, ctx.mode);
    block.compute_outputs(state, inputs, ctx)
}

/// Registry of state block types.
#[derive(Clone, Default)]
pub struct StateBlockRegistry {
    blocks: HashMap<String, Arc<dyn StateBlock>>,
}

impl StateBlockRegistry {
    pub fn new() -> Self {
        Self {
            blocks: HashMap::new(),
        }
    }

    pub fn register(&mut self, block: Arc<dyn StateBlock>) {
        self.blocks.insert(block.type_name().to_string(), block);
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<dyn StateBlock>> {
        self.blocks.get(type_name)
    }

    pub fn is_state_block(&self, type_name: &str) -> bool {
        self.blocks.contains_key(type_name)
    }

    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.blocks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
