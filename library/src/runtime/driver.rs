//! Per-frame execution of a compiled program.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use log::{debug, info};

use super::{ProgramEvent, RuntimeInfo};
use crate::config::EngineConfig;
use crate::core::compiler::{
    BUS_OUTPUT, CompileResult, CompiledBlock, CompiledBus, FrameContext, InputSource,
    KernelInputs, Registries,
};
use crate::core::field::{FieldRuntime, FunctionRegistry, SourceLookup};
use crate::core::graph::DependencyGraph;
use crate::core::output::{PortValue, PortValues};
use crate::core::state::StateTable;
use crate::core::time::{TimeContextManager, TimeMode};
use crate::error::LibraryError;
use crate::model::patch::PortRef;
use crate::model::render::RenderNode;
use crate::model::value::Value;
use crate::util::timing::{ScopedTimer, frame_budget};

/// Outputs committed by nodes, keyed by node id.
#[derive(Debug, Default)]
struct CommittedOutputs {
    nodes: HashMap<String, PortValues>,
}

impl CommittedOutputs {
    fn port(&self, port: &PortRef) -> Option<&PortValue> {
        self.nodes.get(&port.block)?.get(&port.port)
    }
}

impl SourceLookup for CommittedOutputs {
    fn lookup(&self, source: &PortRef) -> Option<&Value> {
        self.port(source)?.as_signal()
    }
}

/// Owns everything a running program mutates: state memory, committed outputs
/// and the per-frame field caches.
pub struct ExecutionDriver {
    blocks: BTreeMap<String, CompiledBlock>,
    buses: BTreeMap<String, CompiledBus>,
    order: Vec<String>,
    graph: DependencyGraph,
    states: StateTable,
    functions: FunctionRegistry,
    committed: CommittedOutputs,
    /// Previous-frame outputs of the nodes read through delayed edges.
    previous: CommittedOutputs,
    delayed_nodes: Vec<String>,
    time: TimeContextManager,
    mode: TimeMode,
    fields: FieldRuntime,
    max_program_nodes: usize,
    frame_id: u64,
    frame_budget: Option<Duration>,
    render_ports: Vec<String>,
    render_block: Option<String>,
}

impl fmt::Debug for ExecutionDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionDriver")
            .field("order", &self.order)
            .field("mode", &self.mode)
            .field("frame_id", &self.frame_id)
            .field("render_block", &self.render_block)
            .finish()
    }
}

impl ExecutionDriver {
    pub fn new(result: CompileResult, registries: &Registries) -> Result<Self, LibraryError> {
        Self::with_config(result, registries, &EngineConfig::default())
    }

    /// Takes ownership of a compiled program. Results carrying diagnostics
    /// are refused.
    pub fn with_config(
        result: CompileResult,
        registries: &Registries,
        config: &EngineConfig,
    ) -> Result<Self, LibraryError> {
        if let Some(first) = result.errors.first() {
            return Err(LibraryError::InvalidProgram(format!(
                "compile produced {} diagnostic(s), first: {}",
                result.errors.len(),
                first
            )));
        }

        let render_block = result
            .evaluation_order
            .iter()
            .rev()
            .find(|id| result.blocks.get(*id).is_some_and(|b| b.render_sink))
            .or_else(|| {
                result
                    .evaluation_order
                    .iter()
                    .rev()
                    .find(|id| result.blocks.contains_key(*id))
            })
            .cloned();
        let mut delayed_nodes: Vec<String> = Vec::new();
        for block in result.blocks.values().filter(|b| b.is_stateful()) {
            delayed_nodes.push(block.id.clone());
            for (_, source) in block.inputs.iter() {
                if let InputSource::Bus(bus_id) = source {
                    delayed_nodes.push(bus_id.clone());
                }
            }
        }
        delayed_nodes.sort();
        delayed_nodes.dedup();

        info!(
            "driver ready: {} nodes, render output from {:?}",
            result.evaluation_order.len(),
            render_block
        );

        Ok(Self {
            blocks: result.blocks,
            buses: result.buses,
            order: result.evaluation_order,
            graph: result.graph,
            states: result.state_memory,
            functions: registries.functions.clone(),
            committed: CommittedOutputs::default(),
            previous: CommittedOutputs::default(),
            delayed_nodes,
            time: TimeContextManager::new(),
            mode: config.initial_mode,
            fields: FieldRuntime::new(config.max_program_nodes),
            max_program_nodes: config.max_program_nodes,
            frame_id: 0,
            frame_budget: frame_budget(config.fps),
            render_ports: config.render_ports.clone(),
            render_block,
        })
    }

    pub fn mode(&self) -> TimeMode {
        self.mode
    }

    /// Switches between performance and scrub. The next frame starts a new
    /// time sequence with `dt = 0`.
    pub fn set_mode(&mut self, mode: TimeMode) {
        if self.mode != mode {
            debug!("time mode {:?} -> {:?}", self.mode, mode);
            self.mode = mode;
        }
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn evaluation_order(&self) -> &[String] {
        &self.order
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn state(&self) -> &StateTable {
        &self.states
    }

    /// The last committed value of `block.port`.
    pub fn port_value(&self, block: &str, port: &str) -> Option<&PortValue> {
        self.committed.nodes.get(block)?.get(port)
    }

    /// Evaluates one frame and returns its render tree.
    ///
    /// Reads through delayed edges (out of a state block, or from a bus into
    /// one) always see the previous frame, whatever the evaluation order.
    pub fn run(&mut self, time_ms: f64, info: &RuntimeInfo) -> Result<RenderNode, LibraryError> {
        let ctx = self.time.next(time_ms / 1000.0, self.mode);
        self.frame_id += 1;
        self.fields.begin_frame(self.frame_id);
        let frame_id = self.frame_id;
        let _timer = ScopedTimer::with_budget(self.frame_budget, || {
            format!("frame {} at {} ms", frame_id, time_ms)
        });

        self.snapshot_delayed();
        let Self {
            blocks,
            buses,
            order,
            states,
            functions,
            committed,
            previous,
            fields,
            ..
        } = self;
        let from_state = |block: &str| blocks.get(block).is_some_and(|b| b.is_stateful());

        for id in order.iter() {
            if let Some(bus) = buses.get(id) {
                let value = bus.evaluate(|p| {
                    if from_state(p.block.as_str()) {
                        previous.port(p)
                    } else {
                        committed.port(p)
                    }
                })?;
                committed
                    .nodes
                    .insert(id.clone(), BTreeMap::from([(BUS_OUTPUT.to_string(), value)]));
                continue;
            }
            let Some(block) = blocks.get(id) else {
                continue;
            };

            let mut inputs = KernelInputs::new();
            for (port, source) in block.inputs.iter() {
                let value = match source {
                    InputSource::Output(from) if from_state(from.block.as_str()) => {
                        previous.port(from).cloned()
                    }
                    InputSource::Output(from) => committed.port(from).cloned(),
                    InputSource::Bus(bus_id) => {
                        let outputs = if block.is_stateful() {
                            &*previous
                        } else {
                            &*committed
                        };
                        outputs
                            .port(&PortRef::new(bus_id, BUS_OUTPUT))
                            .cloned()
                            .or_else(|| {
                                buses
                                    .get(bus_id)
                                    .map(|b| PortValue::Signal(b.default.clone()))
                            })
                    }
                };
                inputs.insert(port, value.unwrap_or(PortValue::None));
            }

            let mut frame = FrameContext {
                block_id: id,
                time: &ctx,
                runtime: info,
                functions,
                sources: &*committed,
                fields: &mut *fields,
            };
            let outputs = block.evaluate(&inputs, &mut frame, states)?;
            committed.nodes.insert(id.clone(), outputs);
        }

        Ok(self.extract_render())
    }

    /// Program events at `time_ms`. The core raises none.
    pub fn events(&self, _time_ms: f64, _info: &RuntimeInfo) -> Vec<ProgramEvent> {
        Vec::new()
    }

    /// Re-initializes every state memory and forgets committed outputs.
    pub fn reset(&mut self) -> Result<(), LibraryError> {
        for block in self.blocks.values() {
            if let Some(state_block) = block.state_block() {
                self.states.replace(&block.id, state_block.init_state(0))?;
            }
        }
        self.committed.nodes.clear();
        self.previous.nodes.clear();
        self.time.reset();
        self.fields = FieldRuntime::new(self.max_program_nodes);
        info!("driver reset at frame id {}", self.frame_id);
        Ok(())
    }

    fn snapshot_delayed(&mut self) {
        self.previous.nodes = self
            .delayed_nodes
            .iter()
            .filter_map(|id| Some((id.clone(), self.committed.nodes.get(id)?.clone())))
            .collect();
    }

    fn extract_render(&self) -> RenderNode {
        self.render_block
            .as_ref()
            .and_then(|id| self.committed.nodes.get(id))
            .and_then(|outputs| {
                self.render_ports.iter().find_map(|port| match outputs.get(port) {
                    Some(PortValue::Render(node)) => Some(node.clone()),
                    _ => None,
                })
            })
            .unwrap_or_else(RenderNode::empty)
    }
}
