use patchflow::model::patch::{BlockInstance, Bus, CombineMode, Listener, Publisher};
use patchflow::{
    CompileResult, Compiler, DiagnosticKind, ExecutionDriver, LibraryError, PatchDefinition,
    Registries, Value,
};
use serde_json::json;

fn compile(patch: &PatchDefinition) -> CompileResult {
    Compiler::new(&Registries::with_builtins()).compile(patch)
}

fn assert_empty_plan(result: &CompileResult) {
    assert!(!result.is_ok());
    assert!(result.blocks.is_empty());
    assert!(result.buses.is_empty());
    assert!(result.evaluation_order.is_empty());
    assert!(result.state_memory.is_empty());
}

#[test]
fn pure_cycle_is_rejected() {
    let mut patch = PatchDefinition::new();
    patch
        .add_block(BlockInstance::new("a", "relay"))
        .add_block(BlockInstance::new("b", "relay"))
        .connect(("a", "out"), ("b", "in"))
        .connect(("b", "out"), ("a", "in"));
    let result = compile(&patch);

    assert_empty_plan(&result);
    let cycles = result.errors_of(DiagnosticKind::InstantaneousCycle);
    assert_eq!(cycles.len(), 1);
    let mut ids = cycles[0].node_ids.clone();
    ids.sort();
    assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn cycle_through_bus_is_rejected() {
    let mut patch = PatchDefinition::new();
    patch
        .add_block(BlockInstance::new("r", "relay"))
        .add_bus(Bus::new("loop", CombineMode::Sum, Value::from(0.0)))
        .publish(Publisher::new("r", "loop", "out", 0))
        .listen(Listener::new("r", "loop", "in"));
    let result = compile(&patch);
    assert_eq!(result.errors_of(DiagnosticKind::InstantaneousCycle).len(), 1);
}

#[test]
fn cycle_through_state_compiles() {
    let mut patch = PatchDefinition::new();
    patch
        .add_block(BlockInstance::new("r", "relay"))
        .add_block(BlockInstance::new("d", "delay"))
        .connect(("r", "out"), ("d", "in"))
        .connect(("d", "out"), ("r", "in"));
    let result = compile(&patch);
    assert!(result.is_ok(), "{:?}", result.errors);
    assert_eq!(result.evaluation_order, vec!["r".to_string(), "d".to_string()]);
    assert!(result.state_memory.get("d").is_ok());
}

#[test]
fn missing_references_are_reported() {
    let mut patch = PatchDefinition::new();
    patch
        .add_block(BlockInstance::new("a", "relay"))
        .connect(("ghost", "out"), ("a", "in"))
        .listen(Listener::new("a", "nowhere", "in"));
    let result = compile(&patch);
    assert_empty_plan(&result);
    assert_eq!(result.errors_of(DiagnosticKind::MissingReference).len(), 2);
}

#[test]
fn duplicate_ids_are_reported() {
    let mut patch = PatchDefinition::new();
    patch
        .add_block(BlockInstance::new("x", "relay"))
        .add_block(BlockInstance::new("x", "constant"))
        .add_bus(Bus::new("x", CombineMode::Last, Value::from(0.0)));
    let result = compile(&patch);
    assert_empty_plan(&result);
    assert_eq!(result.errors_of(DiagnosticKind::DuplicateId).len(), 2);
}

#[test]
fn doubly_bound_input_is_reported() {
    let mut patch = PatchDefinition::new();
    patch
        .add_block(BlockInstance::new("a", "constant"))
        .add_block(BlockInstance::new("b", "constant"))
        .add_block(BlockInstance::new("r", "relay"))
        .connect(("a", "out"), ("r", "in"))
        .connect(("b", "out"), ("r", "in"));
    let result = compile(&patch);
    assert_empty_plan(&result);
    assert_eq!(result.errors_of(DiagnosticKind::DuplicateInput).len(), 1);
}

#[test]
fn state_port_boundaries_are_checked() {
    let mut patch = PatchDefinition::new();
    patch
        .add_block(BlockInstance::new("k", "constant"))
        .add_block(BlockInstance::new("acc", "accumulator"))
        .add_block(BlockInstance::new("r", "relay"))
        .connect(("k", "out"), ("acc", "bogus"))
        .connect(("acc", "total"), ("r", "in"));
    let result = compile(&patch);
    assert_empty_plan(&result);
    assert_eq!(
        result.errors_of(DiagnosticKind::StateBoundaryViolation).len(),
        2
    );
}

#[test]
fn unsupported_blocks_are_reported() {
    let mut patch = PatchDefinition::new();
    patch
        .add_block(BlockInstance::new("u", "no.such.block"))
        .add_block(
            BlockInstance::new("m", "field.map").with_config(json!({"function": "eval"})),
        )
        .add_block(BlockInstance::new("i", "field.index"))
        .connect(("i", "out"), ("m", "in"));
    let result = compile(&patch);
    assert_eq!(result.errors_of(DiagnosticKind::UnsupportedBlock).len(), 1);

    patch.blocks.retain(|b| b.id != "u");
    let result = compile(&patch);
    let unsupported = result.errors_of(DiagnosticKind::UnsupportedBlock);
    assert_eq!(unsupported.len(), 1);
    assert!(unsupported[0].message.contains("eval"));
    assert_eq!(unsupported[0].node_ids, vec!["m".to_string()]);
}

#[test]
fn driver_refuses_result_with_diagnostics() {
    let mut patch = PatchDefinition::new();
    patch.add_block(BlockInstance::new("u", "no.such.block"));
    let registries = Registries::with_builtins();
    let result = Compiler::new(&registries).compile(&patch);
    assert!(matches!(
        ExecutionDriver::new(result, &registries),
        Err(LibraryError::InvalidProgram(_))
    ));
}

#[test]
fn compilation_is_deterministic() {
    let patch = PatchDefinition::load(
        r#"{
            "blocks": [
                {"id": "dots", "type": "render.circles"},
                {"id": "grid", "type": "domain.grid", "config": {"rows": 2, "cols": 2}},
                {"id": "clock", "type": "time"},
                {"id": "spin", "type": "phase", "config": {"rate": 0.5}}
            ],
            "connections": [
                {"from": {"block": "grid", "port": "domain"}, "to": {"block": "dots", "port": "domain"}},
                {"from": {"block": "grid", "port": "positions"}, "to": {"block": "dots", "port": "positions"}},
                {"from": {"block": "spin", "port": "out"}, "to": {"block": "dots", "port": "fill"}}
            ]
        }"#,
    )
    .unwrap();
    let first = compile(&patch);
    let second = compile(&patch);
    assert!(first.is_ok(), "{:?}", first.errors);
    assert_eq!(first.evaluation_order, second.evaluation_order);
    // `spin` is a state block, so `dots` reads its previous value and need
    // not wait for it.
    assert_eq!(first.evaluation_order, vec!["clock", "grid", "dots", "spin"]);
}
