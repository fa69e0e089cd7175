//! Built-in state blocks. All memory lives in the block's [`StateMemory`].

use std::collections::BTreeMap;

use crate::core::state::{
    ScrubPolicy, StateBlock, StateFieldSpec, StateInputs, StateMemory, StateOutputs, StateShape,
};
use crate::core::time::TimeContext;
use crate::error::LibraryError;
use crate::model::value::Value;

fn out(value: f64) -> StateOutputs {
    BTreeMap::from([("out".to_string(), Value::from(value))])
}

/// Running sum of `in` over performance frames.
pub struct Accumulator;

impl StateBlock for Accumulator {
    fn type_name(&self) -> &'static str {
        "accumulator"
    }

    fn state_shape(&self) -> StateShape {
        StateShape::new().with("sum", StateFieldSpec::number(0.0))
    }

    fn input_ports(&self) -> &'static [&'static str] {
        &["in"]
    }

    fn output_ports(&self) -> &'static [&'static str] {
        &["out"]
    }

    fn update_state(
        &self,
        state: &mut StateMemory,
        inputs: &StateInputs,
        _ctx: &TimeContext,
    ) -> Result<(), LibraryError> {
        let sum = state.number("sum") + inputs.number("in", 0.0);
        state.set_number("sum", sum)
    }

    fn compute_outputs(
        &self,
        state: &StateMemory,
        _inputs: &StateInputs,
        _ctx: &TimeContext,
    ) -> Result<StateOutputs, LibraryError> {
        Ok(out(state.number("sum")))
    }
}

/// Emits the previous frame's input.
pub struct Delay;

impl StateBlock for Delay {
    fn type_name(&self) -> &'static str {
        "delay"
    }

    fn state_shape(&self) -> StateShape {
        StateShape::new()
            .with("output", StateFieldSpec::number(0.0))
            .with("pending", StateFieldSpec::number(0.0))
    }

    fn input_ports(&self) -> &'static [&'static str] {
        &["in"]
    }

    fn output_ports(&self) -> &'static [&'static str] {
        &["out"]
    }

    fn update_state(
        &self,
        state: &mut StateMemory,
        inputs: &StateInputs,
        _ctx: &TimeContext,
    ) -> Result<(), LibraryError> {
        let pending = state.number("pending");
        state.set_number("output", pending)?;
        state.set_number("pending", inputs.number("in", 0.0))
    }

    fn compute_outputs(
        &self,
        state: &StateMemory,
        _inputs: &StateInputs,
        _ctx: &TimeContext,
    ) -> Result<StateOutputs, LibraryError> {
        Ok(out(state.number("output")))
    }
}

/// Latches `value` on each rising edge of `trigger`.
pub struct SampleHold;

impl SampleHold {
    fn triggered(inputs: &StateInputs) -> bool {
        match inputs.get("trigger") {
            Some(Value::Boolean(flag)) => *flag,
            Some(other) => other.as_f64().is_some_and(|v| v > 0.5),
            None => false,
        }
    }
}

impl StateBlock for SampleHold {
    fn type_name(&self) -> &'static str {
        "sample_hold"
    }

    fn state_shape(&self) -> StateShape {
        StateShape::new()
            .with("held", StateFieldSpec::number(0.0))
            .with("armed", StateFieldSpec::boolean(true))
    }

    fn input_ports(&self) -> &'static [&'static str] {
        &["value", "trigger"]
    }

    fn output_ports(&self) -> &'static [&'static str] {
        &["out"]
    }

    fn update_state(
        &self,
        state: &mut StateMemory,
        inputs: &StateInputs,
        _ctx: &TimeContext,
    ) -> Result<(), LibraryError> {
        let triggered = Self::triggered(inputs);
        let armed = state.get("armed").and_then(Value::as_bool).unwrap_or(true);
        if triggered && armed {
            state.set_number("held", inputs.number("value", 0.0))?;
        }
        state.set("armed", Value::from(!triggered))
    }

    fn compute_outputs(
        &self,
        state: &StateMemory,
        _inputs: &StateInputs,
        _ctx: &TimeContext,
    ) -> Result<StateOutputs, LibraryError> {
        Ok(out(state.number("held")))
    }
}

/// Integral of `value` over performance time. Starts over when scrubbed.
pub struct Integrator;

impl StateBlock for Integrator {
    fn type_name(&self) -> &'static str {
        "integrator"
    }

    fn state_shape(&self) -> StateShape {
        StateShape::new().with("total", StateFieldSpec::number(0.0))
    }

    fn scrub_policy(&self) -> ScrubPolicy {
        ScrubPolicy::Reset
    }

    fn input_ports(&self) -> &'static [&'static str] {
        &["value"]
    }

    fn output_ports(&self) -> &'static [&'static str] {
        &["out"]
    }

    fn update_state(
        &self,
        state: &mut StateMemory,
        inputs: &StateInputs,
        ctx: &TimeContext,
    ) -> Result<(), LibraryError> {
        let total = state.number("total") + inputs.number("value", 0.0) * ctx.dt;
        state.set_number("total", total)
    }

    fn compute_outputs(
        &self,
        state: &StateMemory,
        _inputs: &StateInputs,
        _ctx: &TimeContext,
    ) -> Result<StateOutputs, LibraryError> {
        Ok(out(state.number("total")))
    }
}

/// Oscillator phase in `[0, 1)` advancing at `rate` cycles per second. Under
/// scrub the phase is recomputed from time with the last seen rate.
pub struct Phase;

impl StateBlock for Phase {
    fn type_name(&self) -> &'static str {
        "phase"
    }

    fn state_shape(&self) -> StateShape {
        StateShape::new()
            .with("phase", StateFieldSpec::number(0.0))
            .with("rate", StateFieldSpec::number(1.0))
    }

    fn scrub_policy(&self) -> ScrubPolicy {
        ScrubPolicy::Recompute
    }

    fn input_ports(&self) -> &'static [&'static str] {
        &["rate"]
    }

    fn output_ports(&self) -> &'static [&'static str] {
        &["out"]
    }

    fn update_state(
        &self,
        state: &mut StateMemory,
        inputs: &StateInputs,
        ctx: &TimeContext,
    ) -> Result<(), LibraryError> {
        let rate = inputs.number("rate", 1.0);
        let advanced = state.number("phase") + rate * ctx.dt;
        state.set_number("phase", advanced - advanced.floor())?;
        state.set_number("rate", rate)
    }

    fn compute_outputs(
        &self,
        state: &StateMemory,
        _inputs: &StateInputs,
        _ctx: &TimeContext,
    ) -> Result<StateOutputs, LibraryError> {
        Ok(out(state.number("phase")))
    }

    fn reconstruct_state(
        &self,
        state: &mut StateMemory,
        target_time: f64,
        _ctx: &TimeContext,
    ) -> Result<(), LibraryError> {
        let cycles = target_time * state.number("rate");
        state.set_number("phase", cycles - cycles.floor())
    }
}
