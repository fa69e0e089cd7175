//! Batch evaluation of Field handles into per-element buffers.

use std::collections::HashMap;

use super::handle::{FieldEnv, FieldHandle, HandleCache, SlotData, eval_field_handle};
use super::program::{FieldNodeId, FieldProgram};
use crate::core::bus;
use crate::error::LibraryError;
use crate::model::value::Value;

enum Step {
    Enter(FieldNodeId),
    Exit(FieldNodeId),
}

/// Produces one value per element of `env.domain` for the node `root`.
///
/// Operands are materialized before their users; each node is computed at
/// most once per call.
pub fn materialize(
    root: FieldNodeId,
    env: &FieldEnv,
    program: &FieldProgram,
    cache: &mut HandleCache,
) -> Result<Vec<Value>, LibraryError> {
    let mut buffers: HashMap<FieldNodeId, Vec<Value>> = HashMap::new();
    let mut stack = vec![Step::Enter(root)];

    while let Some(step) = stack.pop() {
        match step {
            Step::Enter(node) => {
                if buffers.contains_key(&node) {
                    continue;
                }
                let handle = eval_field_handle(node, env, program, cache)?;
                stack.push(Step::Exit(node));
                for operand in handle.operands().into_iter().rev() {
                    stack.push(Step::Enter(operand));
                }
            }
            Step::Exit(node) => {
                if buffers.contains_key(&node) {
                    continue;
                }
                let handle = eval_field_handle(node, env, program, cache)?;
                let buffer = fill(&handle, env, &buffers)?;
                buffers.insert(node, buffer);
            }
        }
    }

    buffers
        .remove(&root)
        .ok_or_else(|| LibraryError::evaluation("materialized root buffer missing"))
}

fn operand<'b>(
    buffers: &'b HashMap<FieldNodeId, Vec<Value>>,
    node: FieldNodeId,
) -> Result<&'b [Value], LibraryError> {
    buffers
        .get(&node)
        .map(Vec::as_slice)
        .ok_or_else(|| LibraryError::evaluation(format!("operand #{} not materialized", node)))
}

fn fill(
    handle: &FieldHandle,
    env: &FieldEnv,
    buffers: &HashMap<FieldNodeId, Vec<Value>>,
) -> Result<Vec<Value>, LibraryError> {
    let len = env.domain.len();
    match handle {
        FieldHandle::Const(value) => Ok(vec![value.clone(); len]),
        FieldHandle::Index => Ok((0..len).map(|i| Value::from(i as f64)).collect()),
        FieldHandle::Source { slot } => match env.slot(*slot) {
            Some(SlotData::Array(items)) if items.len() >= len => Ok(items[..len].to_vec()),
            Some(SlotData::Array(items)) => Err(LibraryError::evaluation(format!(
                "source slot {} has {} items for a domain of {}",
                slot,
                items.len(),
                len
            ))),
            _ => Err(LibraryError::evaluation(format!(
                "slot {} is not an array source",
                slot
            ))),
        },
        FieldHandle::Broadcast { slot } => match env.slot(*slot) {
            Some(SlotData::Signal(value)) => Ok(vec![value.clone(); len]),
            _ => Err(LibraryError::evaluation(format!(
                "slot {} is not a signal",
                slot
            ))),
        },
        FieldHandle::Op { op, params, src } => operand(buffers, *src)?
            .iter()
            .map(|x| op.apply(x, params))
            .collect(),
        FieldHandle::Zip { op, params, a, b } => {
            let a = operand(buffers, *a)?;
            let b = operand(buffers, *b)?;
            a.iter()
                .zip(b)
                .map(|(x, y)| op.apply(x, y, params))
                .collect()
        }
        FieldHandle::Combine { mode, terms } => {
            let columns = terms
                .iter()
                .map(|t| operand(buffers, *t))
                .collect::<Result<Vec<_>, _>>()?;
            let default = Value::default();
            (0..len)
                .map(|i| {
                    let row: Vec<Value> = columns.iter().map(|c| c[i].clone()).collect();
                    bus::combine(*mode, &row, &default)
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::Domain;
    use crate::core::field::eval::{FieldEvalContext, FieldEvaluator};
    use crate::core::field::expr::FieldExpr;
    use crate::core::field::functions::FunctionRegistry;
    use crate::core::field::opcode::{BinaryOp, UnaryOp};
    use crate::core::time::TimeContext;
    use crate::model::patch::{CombineMode, PortRef};

    fn functions() -> FunctionRegistry {
        let mut f = FunctionRegistry::new();
        f.register_unary("scale", UnaryOp::Scale);
        f.register_unary("neg", UnaryOp::Neg);
        f.register_binary("add", BinaryOp::Add);
        f.register_binary("mul", BinaryOp::Mul);
        f
    }

    #[test]
    fn test_matches_lazy_evaluation() {
        let functions = functions();
        let domain = Domain::from_count("d", 6);
        let weights = PortRef::new("layout", "weights");
        let data = Value::Array((0..6).map(|i| Value::from(i as f64 * 0.5)).collect());

        let scaled = FieldExpr::map("scale", vec![Value::from(3.0)], FieldExpr::domain());
        let expr = FieldExpr::bus(
            vec![
                FieldExpr::zip(
                    "mul",
                    Vec::new(),
                    scaled.clone(),
                    FieldExpr::source(weights.clone()),
                ),
                FieldExpr::map("neg", Vec::new(), scaled),
                FieldExpr::constant(Value::from(1.0)),
            ],
            CombineMode::Max,
        );

        let mut sources = HashMap::new();
        sources.insert(weights.clone(), data.clone());
        let ctx = FieldEvalContext {
            domain: &domain,
            frame_id: 4,
            functions: &functions,
            sources: &sources,
        };
        let lazy = FieldEvaluator::new()
            .evaluate_domain(&expr, &TimeContext::performance(0.0, 0.0, 0), &ctx)
            .unwrap();

        let mut program = FieldProgram::new();
        let root = program.lower(&expr);
        let mut env = FieldEnv::new(4, &domain, &functions);
        env.bind(weights, data);
        let mut cache = HandleCache::new();
        let batch = materialize(root, &env, &program, &mut cache).unwrap();

        assert_eq!(batch, lazy);
        assert_eq!(batch[0], Value::from(1.0));
        assert_eq!(batch[2], Value::from(6.0));
    }

    #[test]
    fn test_broadcast_signal() {
        let functions = functions();
        let domain = Domain::from_count("d", 3);
        let speed = PortRef::new("lfo", "out");
        let mut program = FieldProgram::new();
        let root = program.lower(&FieldExpr::zip(
            "add",
            Vec::new(),
            FieldExpr::domain(),
            FieldExpr::source(speed.clone()),
        ));
        let mut env = FieldEnv::new(0, &domain, &functions);
        env.bind(speed, Value::from(10.0));
        let values = materialize(root, &env, &program, &mut HandleCache::new()).unwrap();
        assert_eq!(
            values,
            vec![Value::from(10.0), Value::from(11.0), Value::from(12.0)]
        );
    }

    #[test]
    fn test_short_source_is_an_error() {
        let functions = functions();
        let domain = Domain::from_count("d", 3);
        let port = PortRef::new("b", "short");
        let mut program = FieldProgram::new();
        let root = program.lower(&FieldExpr::source(port.clone()));
        let mut env = FieldEnv::new(0, &domain, &functions);
        env.bind(port, Value::Array(vec![Value::from(1.0)]));
        assert!(materialize(root, &env, &program, &mut HandleCache::new()).is_err());
    }

    #[test]
    fn test_cached_source_follows_slot_layout() {
        let functions = functions();
        let domain = Domain::from_count("d", 2);
        let early = PortRef::new("a", "out");
        let late = PortRef::new("b", "out");
        let mut program = FieldProgram::new();
        program.lower(&FieldExpr::source(early.clone()));
        let root = program.lower(&FieldExpr::source(late.clone()));
        let late_data = Value::Array(vec![Value::from(7.0), Value::from(8.0)]);
        let mut cache = HandleCache::new();

        // Same frame, first without `early` bound, then with it.
        let mut env = FieldEnv::new(3, &domain, &functions);
        env.bind(late.clone(), late_data.clone());
        let first = materialize(root, &env, &program, &mut cache).unwrap();

        let mut env = FieldEnv::new(3, &domain, &functions);
        env.bind(early, Value::Array(vec![Value::from(1.0), Value::from(2.0)]));
        env.bind(late, late_data);
        let second = materialize(root, &env, &program, &mut cache).unwrap();

        assert_eq!(first, vec![Value::from(7.0), Value::from(8.0)]);
        assert_eq!(second, first);
    }

    #[test]
    fn test_source_switching_to_signal_in_frame() {
        let functions = functions();
        let domain = Domain::from_count("d", 2);
        let port = PortRef::new("b", "out");
        let mut program = FieldProgram::new();
        let root = program.lower(&FieldExpr::source(port.clone()));
        let mut cache = HandleCache::new();

        let mut env = FieldEnv::new(1, &domain, &functions);
        env.bind(port.clone(), Value::Array(vec![Value::from(1.0), Value::from(2.0)]));
        materialize(root, &env, &program, &mut cache).unwrap();

        let mut env = FieldEnv::new(1, &domain, &functions);
        env.bind(port, Value::from(4.0));
        assert_eq!(
            materialize(root, &env, &program, &mut cache).unwrap(),
            vec![Value::from(4.0), Value::from(4.0)]
        );
    }
}
