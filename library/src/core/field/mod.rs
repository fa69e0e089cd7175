//! Per-element Field expressions and their evaluation paths.
//!
//! Fields are lazy: blocks build [`FieldExpr`] DAGs and only sinks ask for
//! values, either one element at a time through [`FieldEvaluator`] or in batch
//! through a [`FieldProgram`] and [`materialize`].

pub mod eval;
pub mod expr;
pub mod functions;
pub mod handle;
pub mod materialize;
pub mod opcode;
pub mod program;

pub use eval::{FieldEvalContext, FieldEvaluator, FieldMemo, SourceLookup};
pub use expr::{FieldExpr, FieldKind, NodeKey};
pub use functions::{Arity, FieldFunction, FunctionRegistry};
pub use handle::{FieldEnv, FieldHandle, HandleCache, SlotData, eval_field_handle};
pub use materialize::materialize;
pub use opcode::{BinaryOp, OpCode, UnaryOp};
pub use program::{FieldIrNode, FieldNodeId, FieldProgram};

use log::debug;

/// Field state owned by one driver: the lazy memo, the node arena and its
/// handle cache.
#[derive(Debug)]
pub struct FieldRuntime {
    pub evaluator: FieldEvaluator,
    pub program: FieldProgram,
    pub handles: HandleCache,
    frame_id: u64,
    max_program_nodes: usize,
}

impl FieldRuntime {
    pub fn new(max_program_nodes: usize) -> Self {
        Self {
            evaluator: FieldEvaluator::new(),
            program: FieldProgram::new(),
            handles: HandleCache::new(),
            frame_id: 0,
            max_program_nodes,
        }
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// Starts a new frame. Every per-frame cache is moved to `frame_id`; the
    /// program arena is rebuilt once it outgrows its limit.
    pub fn begin_frame(&mut self, frame_id: u64) {
        self.frame_id = frame_id;
        if self.program.len() > self.max_program_nodes {
            debug!(
                "field program reached {} nodes, rebuilding",
                self.program.len()
            );
            self.program.clear();
            self.handles.reset();
        }
        self.handles.advance(frame_id);
    }
}

impl Default for FieldRuntime {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_PROGRAM_NODES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::value::Value;

    #[test]
    fn test_program_is_rebuilt_past_limit() {
        let mut runtime = FieldRuntime::new(2);
        for i in 0..4 {
            runtime
                .program
                .lower(&FieldExpr::constant(Value::from(i as f64)));
        }
        assert_eq!(runtime.program.len(), 4);
        runtime.begin_frame(1);
        assert!(runtime.program.is_empty());
        assert_eq!(runtime.frame_id(), 1);
        assert_eq!(runtime.handles.frame_id(), Some(1));
    }
}
