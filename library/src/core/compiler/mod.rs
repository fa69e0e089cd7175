//! Patch compiler.
//!
//! Turns a [`PatchDefinition`] into an execution plan in four phases, each
//! gated on the previous one succeeding: graph construction, cycle legality,
//! ordering, and lowering. Problems are collected as [`CompileDiagnostic`]s;
//! any diagnostic leaves the plan empty.

pub mod evaluator;
pub mod lowering;

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use log::{debug, info, warn};
use serde::Serialize;

use crate::core::field::FunctionRegistry;
use crate::core::graph::DependencyGraph;
use crate::core::state::{StateBlockRegistry, StateInputs, StateTable};
use crate::model::patch::{BlockInstance, PatchDefinition, PortRef};
use crate::util::timing::ScopedTimer;

pub use evaluator::{BUS_OUTPUT, BlockEvaluator, CompiledBlock, CompiledBus};
pub use lowering::{
    BlockCatalog, BlockKernel, BlockLowering, FrameContext, InputSource, KernelInputs,
    LoweredBlock, LoweringContext, ResolvedInputs,
};

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    InstantaneousCycle,
    MissingReference,
    StateBoundaryViolation,
    DuplicateId,
    /// An input port bound more than once.
    DuplicateInput,
    UnsupportedBlock,
    OrderingFailure,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CompileDiagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub node_ids: Vec<String>,
}

impl CompileDiagnostic {
    pub fn new<S: AsRef<str>>(
        kind: DiagnosticKind,
        message: impl Into<String>,
        node_ids: &[S],
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            node_ids: node_ids.iter().map(|id| id.as_ref().to_string()).collect(),
        }
    }

    /// A diagnostic not tied to particular nodes.
    pub fn global(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            node_ids: Vec::new(),
        }
    }
}

impl fmt::Display for CompileDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

/// Explicit registries consulted by the compiler.
#[derive(Clone, Default)]
pub struct Registries {
    pub state_blocks: StateBlockRegistry,
    pub blocks: BlockCatalog,
    pub functions: FunctionRegistry,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registries holding the built-in blocks, state blocks and functions.
    pub fn with_builtins() -> Self {
        let mut registries = Self::new();
        crate::builtin::register_all(&mut registries);
        registries
    }
}

#[derive(Debug, Default)]
pub struct CompileResult {
    pub blocks: BTreeMap<String, CompiledBlock>,
    pub buses: BTreeMap<String, CompiledBus>,
    pub evaluation_order: Vec<String>,
    pub graph: DependencyGraph,
    pub state_memory: StateTable,
    pub errors: Vec<CompileDiagnostic>,
}

impl CompileResult {
    fn failed(graph: DependencyGraph, errors: Vec<CompileDiagnostic>) -> Self {
        Self {
            graph,
            errors,
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors_of(&self, kind: DiagnosticKind) -> Vec<&CompileDiagnostic> {
        self.errors.iter().filter(|e| e.kind == kind).collect()
    }
}

/// Per-block bookkeeping gathered while the graph is built.
#[derive(Default)]
struct Wiring {
    inputs: BTreeMap<String, ResolvedInputs>,
    /// Output ports referenced by connections and publishers, per block.
    used_outputs: BTreeMap<String, Vec<String>>,
    bus_publishers: BTreeMap<String, Vec<(i64, PortRef)>>,
}

pub struct Compiler<'r> {
    registries: &'r Registries,
}

impl<'r> Compiler<'r> {
    pub fn new(registries: &'r Registries) -> Self {
        Self { registries }
    }

    pub fn compile(&self, patch: &PatchDefinition) -> CompileResult {
        let _timer = ScopedTimer::debug_lazy(|| format!("compile ({} blocks)", patch.blocks.len()));

        let mut errors = Vec::new();
        let (graph, wiring) = self.build_graph(patch, &mut errors);
        if !errors.is_empty() {
            return self.fail(graph, errors);
        }

        for cycle in graph.detect_cycles() {
            if cycle.instantaneous {
                let ids: Vec<&str> = cycle.nodes.iter().map(String::as_str).collect();
                errors.push(CompileDiagnostic::new(
                    DiagnosticKind::InstantaneousCycle,
                    format!("instantaneous cycle: {}", cycle.describe()),
                    &ids[..],
                ));
            } else {
                debug!("feedback through state: {}", cycle.describe());
            }
        }
        if !errors.is_empty() {
            return self.fail(graph, errors);
        }

        let order = match graph.topological_sort() {
            Ok(order) => order,
            Err(e) => {
                errors.push(CompileDiagnostic::global(
                    DiagnosticKind::OrderingFailure,
                    e.to_string(),
                ));
                return self.fail(graph, errors);
            }
        };

        let mut result = CompileResult {
            evaluation_order: order,
            ..CompileResult::default()
        };
        self.lower_nodes(patch, wiring, &mut result, &mut errors);
        if !errors.is_empty() {
            return self.fail(graph, errors);
        }

        result.graph = graph;
        info!(
            "compiled {} blocks, {} buses, {} stateful",
            result.blocks.len(),
            result.buses.len(),
            result.state_memory.len()
        );
        result
    }

    fn fail(&self, graph: DependencyGraph, errors: Vec<CompileDiagnostic>) -> CompileResult {
        for error in &errors {
            warn!("{}", error);
        }
        CompileResult::failed(graph, errors)
    }

    fn build_graph(
        &self,
        patch: &PatchDefinition,
        errors: &mut Vec<CompileDiagnostic>,
    ) -> (DependencyGraph, Wiring) {
        let mut graph = DependencyGraph::new();
        let mut wiring = Wiring::default();
        let mut block_ids: HashSet<&str> = HashSet::new();

        for block in &patch.blocks {
            let is_state = self.registries.state_blocks.is_state_block(&block.type_id);
            if !is_state && !self.registries.blocks.contains(&block.type_id) {
                errors.push(CompileDiagnostic::new(
                    DiagnosticKind::UnsupportedBlock,
                    format!("block '{}' has unknown type '{}'", block.id, block.type_id),
                    &[&block.id],
                ));
            }
            if graph.add_block_node(&block.id, is_state).is_err() {
                errors.push(CompileDiagnostic::new(
                    DiagnosticKind::DuplicateId,
                    format!("duplicate block id '{}'", block.id),
                    &[&block.id],
                ));
                continue;
            }
            block_ids.insert(&block.id);
        }

        for bus in &patch.buses {
            if graph.add_bus_node(&bus.id).is_err() {
                errors.push(CompileDiagnostic::new(
                    DiagnosticKind::DuplicateId,
                    format!("bus id '{}' is already used", bus.id),
                    &[&bus.id],
                ));
                continue;
            }
            wiring.bus_publishers.insert(bus.id.clone(), Vec::new());
        }

        let is_bus = |id: &str| patch.get_bus(id).is_some();

        for conn in &patch.connections {
            let (from, to) = (&conn.from, &conn.to);
            let missing: Vec<&str> = [from.block.as_str(), to.block.as_str()]
                .into_iter()
                .filter(|id| !block_ids.contains(id))
                .collect();
            if !missing.is_empty() {
                errors.push(CompileDiagnostic::new(
                    DiagnosticKind::MissingReference,
                    format!(
                        "connection {}.{} -> {}.{} references unknown block {}",
                        from.block,
                        from.port,
                        to.block,
                        to.port,
                        missing.join(", ")
                    ),
                    &missing[..],
                ));
                continue;
            }
            if let Err(e) = graph.add_connection_edge(&from.block, &to.block) {
                errors.push(CompileDiagnostic::new(
                    DiagnosticKind::MissingReference,
                    e.to_string(),
                    &[&from.block, &to.block],
                ));
                continue;
            }
            bind_input(&mut wiring, errors, to, InputSource::Output(from.clone()));
            wiring
                .used_outputs
                .entry(from.block.clone())
                .or_default()
                .push(from.port.clone());
        }

        for publisher in patch.publishers.iter().filter(|p| !p.disabled) {
            if !block_ids.contains(publisher.block.as_str()) || !is_bus(&publisher.bus) {
                errors.push(CompileDiagnostic::new(
                    DiagnosticKind::MissingReference,
                    format!(
                        "publisher {}.{} -> bus '{}' references an unknown block or bus",
                        publisher.block, publisher.port, publisher.bus
                    ),
                    &[&publisher.block, &publisher.bus],
                ));
                continue;
            }
            if let Err(e) = graph.add_publish_edge(&publisher.block, &publisher.bus) {
                errors.push(CompileDiagnostic::new(
                    DiagnosticKind::MissingReference,
                    e.to_string(),
                    &[&publisher.block, &publisher.bus],
                ));
                continue;
            }
            wiring
                .bus_publishers
                .entry(publisher.bus.clone())
                .or_default()
                .push((
                    publisher.sort_key,
                    PortRef::new(&publisher.block, &publisher.port),
                ));
            wiring
                .used_outputs
                .entry(publisher.block.clone())
                .or_default()
                .push(publisher.port.clone());
        }

        for listener in patch.listeners.iter().filter(|l| !l.disabled) {
            if !block_ids.contains(listener.block.as_str()) || !is_bus(&listener.bus) {
                errors.push(CompileDiagnostic::new(
                    DiagnosticKind::MissingReference,
                    format!(
                        "listener bus '{}' -> {}.{} references an unknown block or bus",
                        listener.bus, listener.block, listener.port
                    ),
                    &[&listener.bus, &listener.block],
                ));
                continue;
            }
            if let Err(e) = graph.add_listen_edge(&listener.bus, &listener.block) {
                errors.push(CompileDiagnostic::new(
                    DiagnosticKind::MissingReference,
                    e.to_string(),
                    &[&listener.bus, &listener.block],
                ));
                continue;
            }
            let target = PortRef::new(&listener.block, &listener.port);
            bind_input(
                &mut wiring,
                errors,
                &target,
                InputSource::Bus(listener.bus.clone()),
            );
        }

        (graph, wiring)
    }

    fn lower_nodes(
        &self,
        patch: &PatchDefinition,
        mut wiring: Wiring,
        result: &mut CompileResult,
        errors: &mut Vec<CompileDiagnostic>,
    ) {
        let order = result.evaluation_order.clone();
        for id in &order {
            if let Some(bus) = patch.get_bus(id) {
                let mut publishers = wiring.bus_publishers.remove(id).unwrap_or_default();
                publishers
                    .sort_by(|(ka, pa), (kb, pb)| ka.cmp(kb).then_with(|| pa.block.cmp(&pb.block)));
                result.buses.insert(
                    id.clone(),
                    CompiledBus {
                        id: id.clone(),
                        combine: bus.combine,
                        default: bus.default.clone(),
                        publishers: publishers.into_iter().map(|(_, p)| p).collect(),
                    },
                );
                continue;
            }

            let Some(block) = patch.get_block(id) else {
                errors.push(CompileDiagnostic::new(
                    DiagnosticKind::OrderingFailure,
                    format!("scheduled node '{}' is neither a block nor a bus", id),
                    &[id],
                ));
                continue;
            };
            let inputs = wiring.inputs.remove(id).unwrap_or_default();
            let used_outputs = wiring.used_outputs.remove(id).unwrap_or_default();

            let compiled = if self.registries.state_blocks.is_state_block(&block.type_id) {
                self.lower_state_block(block, inputs, &used_outputs, result, errors)
            } else {
                self.lower_catalog_block(block, inputs, &used_outputs, errors)
            };
            if let Some(compiled) = compiled {
                result.blocks.insert(id.clone(), compiled);
            }
        }
    }

    fn lower_state_block(
        &self,
        block: &BlockInstance,
        inputs: ResolvedInputs,
        used_outputs: &[String],
        result: &mut CompileResult,
        errors: &mut Vec<CompileDiagnostic>,
    ) -> Option<CompiledBlock> {
        let state_block = self.registries.state_blocks.get(&block.type_id)?.clone();
        let before = errors.len();

        if let Err(reason) = state_block.state_shape().validate() {
            errors.push(CompileDiagnostic::new(
                DiagnosticKind::StateBoundaryViolation,
                format!("block '{}' ({}): {}", block.id, block.type_id, reason),
                &[&block.id],
            ));
        }
        for (port, _) in inputs.iter() {
            if !state_block.input_ports().iter().any(|p| *p == port) {
                errors.push(CompileDiagnostic::new(
                    DiagnosticKind::StateBoundaryViolation,
                    format!(
                        "state block '{}' ({}) has no input port '{}'",
                        block.id, block.type_id, port
                    ),
                    &[&block.id],
                ));
            }
        }
        for port in used_outputs {
            if !state_block.output_ports().iter().any(|p| *p == port.as_str()) {
                errors.push(CompileDiagnostic::new(
                    DiagnosticKind::StateBoundaryViolation,
                    format!(
                        "state block '{}' ({}) has no output port '{}'",
                        block.id, block.type_id, port
                    ),
                    &[&block.id],
                ));
            }
        }

        let mut defaults = StateInputs::new();
        for port in state_block.input_ports() {
            match lowering::config_value(&block.config, port) {
                Ok(Some(value)) => defaults.insert(port, value),
                Ok(None) => {}
                Err(e) => errors.push(CompileDiagnostic::new(
                    DiagnosticKind::StateBoundaryViolation,
                    format!("block '{}': {}", block.id, e),
                    &[&block.id],
                )),
            }
        }

        if errors.len() > before {
            return None;
        }
        if let Err(e) = result
            .state_memory
            .allocate(&block.id, state_block.init_state(0))
        {
            errors.push(CompileDiagnostic::new(
                DiagnosticKind::StateBoundaryViolation,
                e.to_string(),
                &[&block.id],
            ));
            return None;
        }

        Some(CompiledBlock {
            id: block.id.clone(),
            type_id: block.type_id.clone(),
            inputs,
            outputs: state_block
                .output_ports()
                .iter()
                .map(|p| p.to_string())
                .collect(),
            evaluator: BlockEvaluator::Stateful {
                block: state_block,
                defaults,
            },
            render_sink: false,
        })
    }

    fn lower_catalog_block(
        &self,
        block: &BlockInstance,
        inputs: ResolvedInputs,
        used_outputs: &[String],
        errors: &mut Vec<CompileDiagnostic>,
    ) -> Option<CompiledBlock> {
        let lowering = self.registries.blocks.get(&block.type_id)?;
        let before = errors.len();

        for (port, _) in inputs.iter() {
            if !lowering.input_ports().iter().any(|p| *p == port) {
                errors.push(CompileDiagnostic::new(
                    DiagnosticKind::MissingReference,
                    format!(
                        "block '{}' ({}) has no input port '{}'",
                        block.id, block.type_id, port
                    ),
                    &[&block.id],
                ));
            }
        }

        let ctx = LoweringContext {
            block_id: &block.id,
            type_id: &block.type_id,
            functions: &self.registries.functions,
        };
        let lowered = match lowering.lower(&ctx, &inputs, &block.config) {
            Ok(lowered) => lowered,
            Err(e) => {
                errors.push(CompileDiagnostic::new(
                    DiagnosticKind::UnsupportedBlock,
                    format!("block '{}' ({}): {}", block.id, block.type_id, e),
                    &[&block.id],
                ));
                return None;
            }
        };

        for port in used_outputs {
            if !lowered.outputs.contains(port) {
                errors.push(CompileDiagnostic::new(
                    DiagnosticKind::MissingReference,
                    format!(
                        "block '{}' ({}) has no output port '{}'",
                        block.id, block.type_id, port
                    ),
                    &[&block.id],
                ));
            }
        }
        if errors.len() > before {
            return None;
        }

        Some(CompiledBlock {
            id: block.id.clone(),
            type_id: block.type_id.clone(),
            inputs,
            outputs: lowered.outputs,
            evaluator: BlockEvaluator::Pure(lowered.kernel),
            render_sink: lowered.render_sink,
        })
    }
}

fn bind_input(
    wiring: &mut Wiring,
    errors: &mut Vec<CompileDiagnostic>,
    target: &PortRef,
    source: InputSource,
) {
    let previous = wiring
        .inputs
        .entry(target.block.clone())
        .or_default()
        .bind(&target.port, source);
    if previous.is_some() {
        errors.push(CompileDiagnostic::new(
            DiagnosticKind::DuplicateInput,
            format!(
                "input {}.{} already has a connection",
                target.block, target.port
            ),
            &[&target.block],
        ));
    }
}
