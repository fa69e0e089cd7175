//! Materialization-ready Field recipes.
//!
//! A [`FieldHandle`] mirrors one [`FieldProgram`] node with function names
//! resolved to opcodes and operands given as node ids. Building a handle never
//! touches element data.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::functions::FunctionRegistry;
use super::opcode::{BinaryOp, OpCode, UnaryOp};
use super::program::{FieldIrNode, FieldNodeId, FieldProgram};
use crate::core::domain::Domain;
use crate::error::LibraryError;
use crate::model::patch::{CombineMode, PortRef};
use crate::model::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum FieldHandle {
    Const(Value),
    Index,
    /// Per-element data supplied through an input slot.
    Source { slot: usize },
    /// A signal value sampled once and repeated for every element.
    Broadcast { slot: usize },
    Op {
        op: UnaryOp,
        params: Vec<Value>,
        src: FieldNodeId,
    },
    Zip {
        op: BinaryOp,
        params: Vec<Value>,
        a: FieldNodeId,
        b: FieldNodeId,
    },
    Combine {
        mode: CombineMode,
        terms: Vec<FieldNodeId>,
    },
}

impl FieldHandle {
    pub fn operands(&self) -> Vec<FieldNodeId> {
        match self {
            FieldHandle::Const(_)
            | FieldHandle::Index
            | FieldHandle::Source { .. }
            | FieldHandle::Broadcast { .. } => Vec::new(),
            FieldHandle::Op { src, .. } => vec![*src],
            FieldHandle::Zip { a, b, .. } => vec![*a, *b],
            FieldHandle::Combine { terms, .. } => terms.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SlotData {
    Array(Vec<Value>),
    Signal(Value),
}

impl SlotData {
    fn is_array(&self) -> bool {
        matches!(self, SlotData::Array(_))
    }
}

/// Per-frame inputs for handle construction and materialization.
pub struct FieldEnv<'a> {
    pub frame_id: u64,
    pub domain: &'a Domain,
    pub functions: &'a FunctionRegistry,
    slots: Vec<SlotData>,
    ports: Vec<PortRef>,
    slot_index: HashMap<PortRef, usize>,
    layout: u64,
}

impl<'a> FieldEnv<'a> {
    pub fn new(frame_id: u64, domain: &'a Domain, functions: &'a FunctionRegistry) -> Self {
        Self {
            frame_id,
            domain,
            functions,
            slots: Vec::new(),
            ports: Vec::new(),
            slot_index: HashMap::new(),
            layout: 0,
        }
    }

    /// Binds a block output as an input slot. Arrays become per-element
    /// sources, anything else is broadcast.
    pub fn bind(&mut self, port: PortRef, value: Value) -> usize {
        let data = match value {
            Value::Array(items) => SlotData::Array(items),
            other => SlotData::Signal(other),
        };
        let slot = match self.slot_index.get(&port) {
            Some(&slot) => {
                self.slots[slot] = data;
                slot
            }
            None => {
                let slot = self.slots.len();
                self.slots.push(data);
                self.ports.push(port.clone());
                self.slot_index.insert(port, slot);
                slot
            }
        };
        self.layout = self.hash_layout();
        slot
    }

    /// Signature of which port sits in which slot, and whether it is an
    /// array. Cached handles are only valid under the layout they were
    /// built for.
    pub fn layout(&self) -> u64 {
        self.layout
    }

    fn hash_layout(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for (port, data) in self.ports.iter().zip(&self.slots) {
            port.hash(&mut hasher);
            data.is_array().hash(&mut hasher);
        }
        hasher.finish()
    }

    pub fn slot_of(&self, port: &PortRef) -> Option<usize> {
        self.slot_index.get(port).copied()
    }

    pub fn slot(&self, slot: usize) -> Option<&SlotData> {
        self.slots.get(slot)
    }
}

/// Handle cache indexed by node id. An entry is valid only while its stamp
/// equals the current epoch; advancing the frame or changing the slot layout
/// bumps the epoch instead of clearing the arrays.
#[derive(Debug, Default)]
pub struct HandleCache {
    frame_id: Option<u64>,
    layout: u64,
    epoch: u64,
    stamp: Vec<u64>,
    handles: Vec<Option<FieldHandle>>,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, frame_id: u64) {
        if self.frame_id != Some(frame_id) {
            self.frame_id = Some(frame_id);
            self.epoch += 1;
        }
    }

    fn sync(&mut self, frame_id: u64, layout: u64) {
        if self.frame_id != Some(frame_id) || self.layout != layout {
            self.frame_id = Some(frame_id);
            self.layout = layout;
            self.epoch += 1;
        }
    }

    /// Drops every entry; used when the program arena is rebuilt.
    pub fn reset(&mut self) {
        self.stamp.clear();
        self.handles.clear();
        self.epoch += 1;
    }

    pub fn frame_id(&self) -> Option<u64> {
        self.frame_id
    }

    pub fn get(&self, node: FieldNodeId) -> Option<&FieldHandle> {
        if self.epoch == 0 || self.stamp.get(node) != Some(&self.epoch) {
            return None;
        }
        self.handles.get(node).and_then(Option::as_ref)
    }

    fn put(&mut self, node: FieldNodeId, handle: FieldHandle) {
        if node >= self.stamp.len() {
            self.stamp.resize(node + 1, 0);
            self.handles.resize(node + 1, None);
        }
        self.stamp[node] = self.epoch;
        self.handles[node] = Some(handle);
    }

    /// Number of entries valid for the current frame.
    pub fn live_entries(&self) -> usize {
        self.stamp.iter().filter(|s| **s == self.epoch).count()
    }
}

/// Returns the handle for `node_id`, building and caching it if this frame has
/// not seen the node under the same slot layout.
pub fn eval_field_handle(
    node_id: FieldNodeId,
    env: &FieldEnv,
    program: &FieldProgram,
    cache: &mut HandleCache,
) -> Result<FieldHandle, LibraryError> {
    cache.sync(env.frame_id, env.layout());
    if let Some(handle) = cache.get(node_id) {
        return Ok(handle.clone());
    }
    let handle = lower_node(node_id, env, program)?;
    cache.put(node_id, handle.clone());
    Ok(handle)
}

fn lower_node(
    node_id: FieldNodeId,
    env: &FieldEnv,
    program: &FieldProgram,
) -> Result<FieldHandle, LibraryError> {
    let node = program
        .node(node_id)
        .ok_or_else(|| LibraryError::lowering(format!("unknown field node #{}", node_id)))?;
    let handle = match node {
        FieldIrNode::Const(value) => FieldHandle::Const(value.clone()),
        FieldIrNode::Index => FieldHandle::Index,
        FieldIrNode::Source(port) => {
            let slot = env.slot_of(port).ok_or_else(|| {
                LibraryError::lowering(format!(
                    "no input slot bound for source {}.{}",
                    port.block, port.port
                ))
            })?;
            match env.slot(slot) {
                Some(SlotData::Array(_)) => FieldHandle::Source { slot },
                Some(SlotData::Signal(_)) => FieldHandle::Broadcast { slot },
                None => {
                    return Err(LibraryError::lowering(format!(
                        "input slot {} is not bound",
                        slot
                    )));
                }
            }
        }
        FieldIrNode::Map {
            function,
            params,
            src,
        } => FieldHandle::Op {
            op: unary_opcode(env.functions, function)?,
            params: params.clone(),
            src: *src,
        },
        FieldIrNode::Adapter { function, src } => FieldHandle::Op {
            op: unary_opcode(env.functions, function)?,
            params: Vec::new(),
            src: *src,
        },
        FieldIrNode::Zip {
            function,
            params,
            a,
            b,
        } => match env.functions.resolve_opcode(function)? {
            OpCode::Binary(op) => FieldHandle::Zip {
                op,
                params: params.clone(),
                a: *a,
                b: *b,
            },
            OpCode::Unary(_) => {
                return Err(LibraryError::lowering(format!(
                    "function '{}' is unary but used in a zip",
                    function
                )));
            }
        },
        FieldIrNode::Combine { mode, terms } => FieldHandle::Combine {
            mode: *mode,
            terms: terms.clone(),
        },
    };
    Ok(handle)
}

fn unary_opcode(functions: &FunctionRegistry, name: &str) -> Result<UnaryOp, LibraryError> {
    match functions.resolve_opcode(name)? {
        OpCode::Unary(op) => Ok(op),
        OpCode::Binary(_) => Err(LibraryError::lowering(format!(
            "function '{}' is binary but used as a unary map",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::expr::FieldExpr;

    fn functions() -> FunctionRegistry {
        let mut f = FunctionRegistry::new();
        f.register_unary("scale", UnaryOp::Scale);
        f.register_binary("add", BinaryOp::Add);
        f
    }

    #[test]
    fn test_handles_are_cached_per_frame() {
        let functions = functions();
        let domain = Domain::from_count("d", 3);
        let mut program = FieldProgram::new();
        let root = program.lower(&FieldExpr::map(
            "scale",
            vec![Value::from(2.0)],
            FieldExpr::domain(),
        ));
        let mut cache = HandleCache::new();

        let env = FieldEnv::new(1, &domain, &functions);
        let handle = eval_field_handle(root, &env, &program, &mut cache).unwrap();
        assert_eq!(
            handle,
            FieldHandle::Op {
                op: UnaryOp::Scale,
                params: vec![Value::from(2.0)],
                src: 0,
            }
        );
        assert_eq!(cache.live_entries(), 1);

        let env2 = FieldEnv::new(2, &domain, &functions);
        cache.advance(env2.frame_id);
        assert!(cache.get(root).is_none());
        assert_eq!(cache.live_entries(), 0);
        eval_field_handle(root, &env2, &program, &mut cache).unwrap();
        assert!(cache.get(root).is_some());
    }

    #[test]
    fn test_source_or_broadcast_by_slot_kind() {
        let functions = functions();
        let domain = Domain::from_count("d", 2);
        let mut program = FieldProgram::new();
        let arr = program.lower(&FieldExpr::source(PortRef::new("b", "arr")));
        let sig = program.lower(&FieldExpr::source(PortRef::new("b", "sig")));
        let missing = program.lower(&FieldExpr::source(PortRef::new("b", "none")));

        let mut env = FieldEnv::new(0, &domain, &functions);
        env.bind(
            PortRef::new("b", "arr"),
            Value::Array(vec![Value::from(1.0), Value::from(2.0)]),
        );
        env.bind(PortRef::new("b", "sig"), Value::from(5.0));

        let mut cache = HandleCache::new();
        assert_eq!(
            eval_field_handle(arr, &env, &program, &mut cache).unwrap(),
            FieldHandle::Source { slot: 0 }
        );
        assert_eq!(
            eval_field_handle(sig, &env, &program, &mut cache).unwrap(),
            FieldHandle::Broadcast { slot: 1 }
        );
        assert!(eval_field_handle(missing, &env, &program, &mut cache).is_err());
    }

    #[test]
    fn test_unknown_opcode_is_fatal() {
        let functions = functions();
        let domain = Domain::from_count("d", 1);
        let mut program = FieldProgram::new();
        let unknown = program.lower(&FieldExpr::map("mystery", Vec::new(), FieldExpr::domain()));
        let wrong_arity = program.lower(&FieldExpr::zip(
            "scale",
            Vec::new(),
            FieldExpr::domain(),
            FieldExpr::domain(),
        ));
        let env = FieldEnv::new(0, &domain, &functions);
        let mut cache = HandleCache::new();
        assert!(matches!(
            eval_field_handle(unknown, &env, &program, &mut cache),
            Err(LibraryError::FunctionNotFound(_))
        ));
        assert!(matches!(
            eval_field_handle(wrong_arity, &env, &program, &mut cache),
            Err(LibraryError::Lowering(_))
        ));
        assert!(eval_field_handle(99, &env, &program, &mut cache).is_err());
    }
}
