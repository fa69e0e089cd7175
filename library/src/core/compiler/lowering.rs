//! Contract between the compiler and the catalog of pure blocks.
//!
//! A block type implements [`BlockLowering`]. At compile time it sees which of
//! its inputs are connected and its static configuration, and returns a
//! [`LoweredBlock`]: the output ports it declares plus a [`BlockKernel`] that
//! runs once per frame. Anything the block cannot support must be rejected
//! here, not at run time.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::core::domain::{Domain, ElementId};
use crate::core::field::{
    Arity, FieldEnv, FieldEvalContext, FieldExpr, FieldRuntime, FunctionRegistry, SourceLookup,
    materialize,
};
use crate::core::output::{PortValue, PortValues};
use crate::core::time::TimeContext;
use crate::error::LibraryError;
use crate::model::patch::PortRef;
use crate::model::value::Value;
use crate::runtime::RuntimeInfo;

/// Where an input port reads from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputSource {
    Output(PortRef),
    Bus(String),
}

/// The connected inputs of one block instance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedInputs {
    ports: BTreeMap<String, InputSource>,
}

impl ResolvedInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `port`; returns the previous binding if there was one.
    pub fn bind(&mut self, port: &str, source: InputSource) -> Option<InputSource> {
        self.ports.insert(port.to_string(), source)
    }

    pub fn get(&self, port: &str) -> Option<&InputSource> {
        self.ports.get(port)
    }

    pub fn is_connected(&self, port: &str) -> bool {
        self.ports.contains_key(port)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InputSource)> {
        self.ports.iter().map(|(port, source)| (port.as_str(), source))
    }
}

/// Compile-time view handed to [`BlockLowering::lower`].
pub struct LoweringContext<'a> {
    pub block_id: &'a str,
    pub type_id: &'a str,
    pub functions: &'a FunctionRegistry,
}

impl LoweringContext<'_> {
    pub fn output_ref(&self, port: &str) -> PortRef {
        PortRef::new(self.block_id, port)
    }

    /// Fails unless `name` is a catalog function of the given arity.
    pub fn require_function(&self, name: &str, arity: Arity) -> Result<(), LibraryError> {
        let function = self.functions.get(name).map_err(|_| {
            LibraryError::lowering(format!(
                "{} '{}': unknown function '{}'",
                self.type_id, self.block_id, name
            ))
        })?;
        if function.arity() != arity {
            return Err(LibraryError::lowering(format!(
                "{} '{}': function '{}' is {:?}, expected {:?}",
                self.type_id,
                self.block_id,
                name,
                function.arity(),
                arity
            )));
        }
        Ok(())
    }
}

/// Per-frame view handed to [`BlockKernel::run`].
pub struct FrameContext<'a> {
    pub block_id: &'a str,
    pub time: &'a TimeContext,
    pub runtime: &'a RuntimeInfo,
    pub functions: &'a FunctionRegistry,
    /// Committed block outputs that `source` field nodes index into.
    pub sources: &'a dyn SourceLookup,
    pub fields: &'a mut FieldRuntime,
}

impl FrameContext<'_> {
    pub fn frame_id(&self) -> u64 {
        self.fields.frame_id()
    }

    pub fn output_ref(&self, port: &str) -> PortRef {
        PortRef::new(self.block_id, port)
    }

    /// Evaluates `expr` element by element through the memoized evaluator.
    pub fn evaluate_field(
        &mut self,
        expr: &FieldExpr,
        domain: &Domain,
    ) -> Result<Vec<Value>, LibraryError> {
        let ctx = FieldEvalContext {
            domain,
            frame_id: self.fields.frame_id(),
            functions: self.functions,
            sources: self.sources,
        };
        self.fields.evaluator.evaluate_domain(expr, self.time, &ctx)
    }

    /// Evaluates `expr` for a single element.
    pub fn evaluate_element(
        &mut self,
        expr: &FieldExpr,
        domain: &Domain,
        element: &ElementId,
    ) -> Result<Value, LibraryError> {
        let ctx = FieldEvalContext {
            domain,
            frame_id: self.fields.frame_id(),
            functions: self.functions,
            sources: self.sources,
        };
        self.fields.evaluator.evaluate(expr, element, self.time, &ctx)
    }

    /// Lowers `expr` into the program and materializes it in one batch.
    pub fn materialize_field(
        &mut self,
        expr: &FieldExpr,
        domain: &Domain,
    ) -> Result<Vec<Value>, LibraryError> {
        let root = self.fields.program.lower(expr);
        let mut env = FieldEnv::new(self.fields.frame_id(), domain, self.functions);
        for port in self.fields.program.sources() {
            if let Some(value) = self.sources.lookup(port) {
                env.bind(port.clone(), value.clone());
            }
        }
        materialize(root, &env, &self.fields.program, &mut self.fields.handles)
    }
}

/// Input values of one kernel run.
#[derive(Clone, Debug, Default)]
pub struct KernelInputs {
    values: HashMap<String, PortValue>,
}

static NO_VALUE: PortValue = PortValue::None;

impl KernelInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, port: &str, value: PortValue) {
        self.values.insert(port.to_string(), value);
    }

    /// The value on `port`, or [`PortValue::None`] when unconnected.
    pub fn get(&self, port: &str) -> &PortValue {
        self.values.get(port).unwrap_or(&NO_VALUE)
    }

    pub fn number(&self, port: &str, default: f64) -> f64 {
        self.get(port).as_number(default)
    }
}

/// Per-frame body of a lowered pure block.
pub trait BlockKernel: Send + Sync {
    fn run(
        &self,
        inputs: &KernelInputs,
        frame: &mut FrameContext,
    ) -> Result<PortValues, LibraryError>;
}

pub struct LoweredBlock {
    pub outputs: Vec<String>,
    pub kernel: Box<dyn BlockKernel>,
    /// The block produces the frame's render tree.
    pub render_sink: bool,
}

impl LoweredBlock {
    pub fn new(outputs: &[&str], kernel: impl BlockKernel + 'static) -> Self {
        Self {
            outputs: outputs.iter().map(|p| p.to_string()).collect(),
            kernel: Box::new(kernel),
            render_sink: false,
        }
    }

    pub fn render_sink(mut self) -> Self {
        self.render_sink = true;
        self
    }
}

pub trait BlockLowering: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn input_ports(&self) -> &'static [&'static str];

    fn lower(
        &self,
        ctx: &LoweringContext,
        inputs: &ResolvedInputs,
        config: &serde_json::Value,
    ) -> Result<LoweredBlock, LibraryError>;
}

/// Registry of pure block types.
#[derive(Clone, Default)]
pub struct BlockCatalog {
    blocks: HashMap<String, Arc<dyn BlockLowering>>,
}

impl BlockCatalog {
    pub fn new() -> Self {
        Self {
            blocks: HashMap::new(),
        }
    }

    pub fn register(&mut self, block: Arc<dyn BlockLowering>) {
        self.blocks.insert(block.type_name().to_string(), block);
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<dyn BlockLowering>> {
        self.blocks.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.blocks.contains_key(type_name)
    }

    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.blocks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Reads a numeric config entry.
pub fn config_number(config: &serde_json::Value, key: &str) -> Option<f64> {
    config.get(key).and_then(serde_json::Value::as_f64)
}

/// Reads a config entry as a [`Value`].
pub fn config_value(config: &serde_json::Value, key: &str) -> Result<Option<Value>, LibraryError> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(raw) => serde_json::from_value(raw.clone()).map(Some).map_err(|e| {
            LibraryError::lowering(format!("config '{}' is not a value: {}", key, e))
        }),
    }
}
