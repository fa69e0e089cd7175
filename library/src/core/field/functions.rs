//! Named Field function registry.

use std::collections::HashMap;
use std::sync::Arc;

use super::opcode::{BinaryOp, OpCode, UnaryOp};
use crate::error::LibraryError;
use crate::model::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    Unary,
    Binary,
}

/// A pure per-element function addressable by name from a FieldExpr.
pub trait FieldFunction: Send + Sync {
    fn arity(&self) -> Arity;

    fn apply(&self, args: &[Value], params: &[Value]) -> Result<Value, LibraryError>;

    /// The opcode the handle layer lowers this function to. Functions without
    /// one can be evaluated lazily but cannot be materialized in batch.
    fn opcode(&self) -> Option<OpCode>;
}

/// A catalog function backed directly by an opcode.
pub struct OpcodeFunction(pub OpCode);

impl FieldFunction for OpcodeFunction {
    fn arity(&self) -> Arity {
        match self.0 {
            OpCode::Unary(_) => Arity::Unary,
            OpCode::Binary(_) => Arity::Binary,
        }
    }

    fn apply(&self, args: &[Value], params: &[Value]) -> Result<Value, LibraryError> {
        match (self.0, args) {
            (OpCode::Unary(op), [x]) => op.apply(x, params),
            (OpCode::Binary(op), [a, b]) => op.apply(a, b, params),
            _ => Err(LibraryError::evaluation(format!(
                "{:?} called with {} arguments",
                self.0,
                args.len()
            ))),
        }
    }

    fn opcode(&self) -> Option<OpCode> {
        Some(self.0)
    }
}

/// Registry for Field functions.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn FieldFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, function: Arc<dyn FieldFunction>) {
        self.functions.insert(name.to_string(), function);
    }

    pub fn register_unary(&mut self, name: &str, op: UnaryOp) {
        self.register(name, Arc::new(OpcodeFunction(OpCode::Unary(op))));
    }

    pub fn register_binary(&mut self, name: &str, op: BinaryOp) {
        self.register(name, Arc::new(OpcodeFunction(OpCode::Binary(op))));
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn FieldFunction>, LibraryError> {
        self.functions
            .get(name)
            .ok_or_else(|| LibraryError::FunctionNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Resolves a function name to its opcode for handle lowering.
    pub fn resolve_opcode(&self, name: &str) -> Result<OpCode, LibraryError> {
        self.get(name)?.opcode().ok_or_else(|| {
            LibraryError::lowering(format!(
                "function '{}' has no opcode and cannot be lowered",
                name
            ))
        })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
