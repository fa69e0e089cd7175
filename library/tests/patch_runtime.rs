use std::collections::HashMap;

use patchflow::core::compiler::{
    BlockEvaluator, CompiledBlock, FrameContext, KernelInputs, ResolvedInputs,
};
use patchflow::core::field::{FieldRuntime, FunctionRegistry};
use patchflow::core::state::{StateInputs, StateTable};
use patchflow::core::time::TimeContext;
use patchflow::model::patch::{BlockInstance, Bus, CombineMode, Listener, PortRef, Publisher};
use patchflow::model::render::{RenderNode, ShapeKind};
use patchflow::model::value::Vec2;
use patchflow::{
    Compiler, ExecutionDriver, LibraryError, PatchDefinition, PortValue, Registries, RuntimeInfo,
    TimeMode, Value,
};
use serde_json::json;

fn driver_for(patch: &PatchDefinition) -> ExecutionDriver {
    let registries = Registries::with_builtins();
    let result = Compiler::new(&registries).compile(patch);
    assert!(result.is_ok(), "unexpected diagnostics: {:?}", result.errors);
    ExecutionDriver::new(result, &registries).unwrap()
}

fn number(driver: &ExecutionDriver, block: &str, port: &str) -> f64 {
    match driver.port_value(block, port) {
        Some(PortValue::Signal(value)) => value.as_f64().unwrap(),
        other => panic!("{}.{} is not a signal: {:?}", block, port, other),
    }
}

#[test]
fn hold_policy_freezes_while_scrubbing() {
    let mut patch = PatchDefinition::new();
    patch
        .add_block(BlockInstance::new("clock", "time"))
        .add_block(BlockInstance::new("acc", "accumulator"))
        .connect(("clock", "t"), ("acc", "in"));
    let mut driver = driver_for(&patch);
    let info = RuntimeInfo::default();

    for time_ms in [1000.0, 2000.0, 3000.0] {
        driver.run(time_ms, &info).unwrap();
    }
    assert_eq!(number(&driver, "acc", "out"), 6.0);

    driver.set_mode(TimeMode::Scrub);
    for time_ms in [500.0, 8000.0, 2500.0] {
        driver.run(time_ms, &info).unwrap();
        assert_eq!(number(&driver, "acc", "out"), 6.0);
    }

    driver.set_mode(TimeMode::Performance);
    driver.run(4000.0, &info).unwrap();
    assert_eq!(number(&driver, "acc", "out"), 10.0);
}

#[test]
fn feedback_through_state_reads_previous_frame() {
    let mut patch = PatchDefinition::new();
    patch
        .add_block(BlockInstance::new("one", "constant").with_config(json!({"value": 1.0})))
        .add_block(BlockInstance::new("sum", "math.add"))
        .add_block(BlockInstance::new("acc", "accumulator"))
        .connect(("acc", "out"), ("sum", "a"))
        .connect(("one", "out"), ("sum", "b"))
        .connect(("sum", "out"), ("acc", "in"));
    let mut driver = driver_for(&patch);
    let info = RuntimeInfo::default();

    let mut seen = Vec::new();
    for frame in 0..3 {
        driver.run(frame as f64 * 16.0, &info).unwrap();
        seen.push(number(&driver, "acc", "out"));
    }
    assert_eq!(seen, vec![1.0, 3.0, 7.0]);
}

/// Runs three frames of a patch whose state blocks are named after `prefix`,
/// returning what their readers saw.
fn delayed_reads(prefix: &str) -> Vec<[f64; 3]> {
    let acc = format!("{}_acc", prefix);
    let sum = format!("{}_sum", prefix);
    let mut patch = PatchDefinition::new();
    patch
        .add_block(BlockInstance::new(&acc, "accumulator").with_config(json!({"in": 1.0})))
        .add_block(BlockInstance::new(&sum, "accumulator"))
        .add_block(BlockInstance::new("one", "constant").with_config(json!({"value": 1.0})))
        .add_block(BlockInstance::new("m_reader", "relay"))
        .add_block(BlockInstance::new("m_listener", "relay"))
        .add_bus(Bus::new("level", CombineMode::Last, Value::from(0.0)))
        .add_bus(Bus::new("feed", CombineMode::Sum, Value::from(0.0)))
        .connect((acc.as_str(), "out"), ("m_reader", "in"))
        .publish(Publisher::new(&acc, "level", "out", 0))
        .listen(Listener::new("m_listener", "level", "in"))
        .publish(Publisher::new("one", "feed", "out", 0))
        .listen(Listener::new(&sum, "feed", "in"));
    let mut driver = driver_for(&patch);
    let info = RuntimeInfo::default();

    (0..3)
        .map(|frame| {
            driver.run(frame as f64 * 16.0, &info).unwrap();
            [
                number(&driver, "m_reader", "out"),
                number(&driver, "m_listener", "out"),
                number(&driver, &sum, "out"),
            ]
        })
        .collect()
}

#[test]
fn delayed_reads_do_not_depend_on_block_ids() {
    let expected = vec![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [2.0, 2.0, 2.0]];
    assert_eq!(delayed_reads("a"), expected);
    assert_eq!(delayed_reads("z"), expected);
}

#[test]
fn bus_combines_publishers_by_sort_key() {
    let mut patch = PatchDefinition::new();
    patch
        .add_block(BlockInstance::new("a", "constant").with_config(json!({"value": 2.0})))
        .add_block(BlockInstance::new("b", "constant").with_config(json!({"value": 5.0})))
        .add_block(BlockInstance::new("c", "constant").with_config(json!({"value": 100.0})))
        .add_block(BlockInstance::new("total", "relay"))
        .add_block(BlockInstance::new("latest", "relay"))
        .add_bus(Bus::new("sum", CombineMode::Sum, Value::from(0.0)))
        .add_bus(Bus::new("last", CombineMode::Last, Value::from(0.0)))
        .publish(Publisher::new("a", "sum", "out", 0))
        .publish(Publisher::new("b", "sum", "out", 1))
        .publish(Publisher::new("c", "sum", "out", 2).disabled())
        .publish(Publisher::new("a", "last", "out", 9))
        .publish(Publisher::new("b", "last", "out", 1))
        .listen(Listener::new("total", "sum", "in"))
        .listen(Listener::new("latest", "last", "in"));
    let mut driver = driver_for(&patch);
    driver.run(0.0, &RuntimeInfo::default()).unwrap();

    assert_eq!(number(&driver, "total", "out"), 7.0);
    assert_eq!(number(&driver, "latest", "out"), 2.0);
}

#[test]
fn bus_without_publishers_yields_default() {
    let mut patch = PatchDefinition::new();
    patch
        .add_block(BlockInstance::new("r", "relay"))
        .add_bus(Bus::new("quiet", CombineMode::Average, Value::from(0.25)))
        .listen(Listener::new("r", "quiet", "in"));
    let mut driver = driver_for(&patch);
    driver.run(0.0, &RuntimeInfo::default()).unwrap();
    assert_eq!(number(&driver, "r", "out"), 0.25);
}

fn grid_patch() -> PatchDefinition {
    let mut patch = PatchDefinition::new();
    patch
        .add_block(
            BlockInstance::new("grid", "domain.grid")
                .with_config(json!({"rows": 2, "cols": 3, "spacing": 40.0})),
        )
        .add_block(BlockInstance::new("index", "field.index"))
        .add_block(
            BlockInstance::new("size", "field.map")
                .with_config(json!({"function": "offset", "params": [2.0]})),
        )
        .add_block(BlockInstance::new("dots", "render.circles"))
        .connect(("index", "out"), ("size", "in"))
        .connect(("grid", "domain"), ("dots", "domain"))
        .connect(("grid", "positions"), ("dots", "positions"))
        .connect(("size", "out"), ("dots", "radius"));
    patch
}

fn shapes(tree: &RenderNode) -> Vec<(String, f64, Vec2)> {
    let RenderNode::Group { children, .. } = tree else {
        panic!("render output is not a group: {:?}", tree);
    };
    children
        .iter()
        .map(|child| match child {
            RenderNode::Shape {
                id,
                shape: ShapeKind::Circle { radius },
                position,
                ..
            } => (id.clone(), *radius, *position),
            other => panic!("unexpected node {:?}", other),
        })
        .collect()
}

#[test]
fn grid_renders_one_circle_per_cell() {
    let mut driver = driver_for(&grid_patch());
    let tree = driver.run(0.0, &RuntimeInfo::default()).unwrap();
    let circles = shapes(&tree);

    assert_eq!(circles.len(), 6);
    assert_eq!(circles[0].0, "dots:r0c0");
    assert_eq!(circles[5].0, "dots:r1c2");
    assert_eq!(circles[0].1, 2.0);
    assert_eq!(circles[5].1, 7.0);
    assert_eq!(circles[0].2, Vec2::new(360.0, 280.0));
    assert_eq!(circles[5].2, Vec2::new(440.0, 320.0));
}

#[test]
fn grid_is_reproducible_across_compiles() {
    let info = RuntimeInfo::default();
    let first = driver_for(&grid_patch()).run(0.0, &info).unwrap();
    let second = driver_for(&grid_patch()).run(0.0, &info).unwrap();
    assert_eq!(first, second);

    let mut driver = driver_for(&grid_patch());
    let frame_a = driver.run(0.0, &info).unwrap();
    let frame_b = driver.run(16.0, &info).unwrap();
    assert_eq!(frame_a, frame_b);
}

#[test]
fn field_sample_reads_one_element() {
    let mut patch = PatchDefinition::new();
    patch
        .add_block(BlockInstance::new("dom", "domain.count").with_config(json!({"count": 4})))
        .add_block(BlockInstance::new("index", "field.index"))
        .add_block(
            BlockInstance::new("tripled", "field.map")
                .with_config(json!({"function": "scale", "params": [3.0]})),
        )
        .add_block(BlockInstance::new("k", "constant").with_config(json!({"value": 10.0})))
        .add_block(BlockInstance::new("shifted", "math.add"))
        .add_block(BlockInstance::new("probe", "field.sample").with_config(json!({"index": 2})))
        .connect(("index", "out"), ("tripled", "in"))
        .connect(("tripled", "out"), ("shifted", "a"))
        .connect(("k", "out"), ("shifted", "b"))
        .connect(("shifted", "out"), ("probe", "field"))
        .connect(("dom", "domain"), ("probe", "domain"));
    let mut driver = driver_for(&patch);
    driver.run(0.0, &RuntimeInfo::default()).unwrap();
    assert_eq!(number(&driver, "probe", "out"), 16.0);
}

#[test]
fn render_falls_back_to_empty_group() {
    let mut patch = PatchDefinition::new();
    patch.add_block(BlockInstance::new("k", "constant").with_config(json!({"value": 1.0})));
    let mut driver = driver_for(&patch);
    let tree = driver.run(0.0, &RuntimeInfo::default()).unwrap();
    assert_eq!(tree, RenderNode::empty());
}

#[test]
fn reset_reinitializes_state() {
    let mut patch = PatchDefinition::new();
    patch
        .add_block(BlockInstance::new("acc", "accumulator").with_config(json!({"in": 2.0})));
    let mut driver = driver_for(&patch);
    let info = RuntimeInfo::default();
    driver.run(0.0, &info).unwrap();
    driver.run(16.0, &info).unwrap();
    assert_eq!(number(&driver, "acc", "out"), 4.0);

    driver.reset().unwrap();
    assert!(driver.port_value("acc", "out").is_none());
    driver.run(0.0, &info).unwrap();
    assert_eq!(number(&driver, "acc", "out"), 2.0);
}

#[test]
fn stateful_block_without_memory_is_fatal() {
    let registries = Registries::with_builtins();
    let block = CompiledBlock {
        id: "acc".to_string(),
        type_id: "accumulator".to_string(),
        inputs: ResolvedInputs::new(),
        outputs: vec!["out".to_string()],
        evaluator: BlockEvaluator::Stateful {
            block: registries.state_blocks.get("accumulator").unwrap().clone(),
            defaults: StateInputs::new(),
        },
        render_sink: false,
    };
    let functions = FunctionRegistry::new();
    let sources: HashMap<PortRef, Value> = HashMap::new();
    let mut fields = FieldRuntime::default();
    let time = TimeContext::performance(0.0, 0.0, 0);
    let info = RuntimeInfo::default();
    let mut frame = FrameContext {
        block_id: "acc",
        time: &time,
        runtime: &info,
        functions: &functions,
        sources: &sources,
        fields: &mut fields,
    };

    let err = block
        .evaluate(&KernelInputs::new(), &mut frame, &mut StateTable::new())
        .unwrap_err();
    assert!(matches!(err, LibraryError::MissingState(id) if id == "acc"));
}
