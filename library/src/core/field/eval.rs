//! Lazy FieldExpr evaluation with per-frame memoization.

use std::collections::HashMap;

use log::trace;

use super::expr::{FieldExpr, FieldKind, NodeKey};
use super::functions::FunctionRegistry;
use crate::core::bus;
use crate::core::domain::{Domain, ElementId};
use crate::core::time::TimeContext;
use crate::error::LibraryError;
use crate::model::patch::PortRef;
use crate::model::value::Value;

/// Read access to precomputed block outputs referenced by `source` nodes.
pub trait SourceLookup {
    fn lookup(&self, source: &PortRef) -> Option<&Value>;
}

impl SourceLookup for HashMap<PortRef, Value> {
    fn lookup(&self, source: &PortRef) -> Option<&Value> {
        self.get(source)
    }
}

/// Everything a FieldExpr may read besides time.
pub struct FieldEvalContext<'a> {
    pub domain: &'a Domain,
    /// Monotonic per-driver frame id; memo entries from other ids are stale.
    pub frame_id: u64,
    pub functions: &'a FunctionRegistry,
    pub sources: &'a dyn SourceLookup,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct MemoKey {
    node: NodeKey,
    element: usize,
    frame: u64,
}

/// Memo of `(node, element, frame) → value`, cleared when the frame advances.
#[derive(Debug, Default)]
pub struct FieldMemo {
    frame_id: Option<u64>,
    entries: HashMap<MemoKey, Value>,
}

impl FieldMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the memo to `frame_id`, dropping every entry of other frames.
    pub fn advance(&mut self, frame_id: u64) {
        if self.frame_id != Some(frame_id) {
            self.entries.clear();
            self.frame_id = Some(frame_id);
        }
    }

    pub fn frame_id(&self) -> Option<u64> {
        self.frame_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get(&self, node: NodeKey, element: usize) -> Option<&Value> {
        let frame = self.frame_id?;
        self.entries.get(&MemoKey {
            node,
            element,
            frame,
        })
    }

    fn insert(&mut self, node: NodeKey, element: usize, value: Value) {
        if let Some(frame) = self.frame_id {
            self.entries.insert(
                MemoKey {
                    node,
                    element,
                    frame,
                },
                value,
            );
        }
    }
}

enum Step<'e> {
    Enter(&'e FieldExpr),
    Exit(&'e FieldExpr),
}

#[derive(Debug, Default)]
pub struct FieldEvaluator {
    memo: FieldMemo,
}

impl FieldEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memo(&self) -> &FieldMemo {
        &self.memo
    }

    /// Evaluates `expr` for one element.
    pub fn evaluate(
        &mut self,
        expr: &FieldExpr,
        element: &ElementId,
        time: &TimeContext,
        ctx: &FieldEvalContext,
    ) -> Result<Value, LibraryError> {
        let index = ctx.domain.position_of(element).ok_or_else(|| {
            LibraryError::evaluation(format!(
                "element '{}' is not part of domain '{}'",
                element,
                ctx.domain.id()
            ))
        })?;
        self.memo.advance(ctx.frame_id);
        self.evaluate_index(expr, index, time, ctx)
    }

    /// Advances the memo once, then evaluates every element of the domain.
    pub fn evaluate_domain(
        &mut self,
        expr: &FieldExpr,
        time: &TimeContext,
        ctx: &FieldEvalContext,
    ) -> Result<Vec<Value>, LibraryError> {
        self.memo.advance(ctx.frame_id);
        (0..ctx.domain.len())
            .map(|index| self.evaluate_index(expr, index, time, ctx))
            .collect()
    }

    fn evaluate_index(
        &mut self,
        expr: &FieldExpr,
        index: usize,
        time: &TimeContext,
        ctx: &FieldEvalContext,
    ) -> Result<Value, LibraryError> {
        if let Some(value) = self.memo.get(expr.key(), index) {
            return Ok(value.clone());
        }

        let mut stack = vec![Step::Enter(expr)];
        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(node) => {
                    if self.memo.get(node.key(), index).is_some() {
                        continue;
                    }
                    stack.push(Step::Exit(node));
                    for child in node.children().into_iter().rev() {
                        stack.push(Step::Enter(child));
                    }
                }
                Step::Exit(node) => {
                    // A shared child may be queued twice before its first exit.
                    if self.memo.get(node.key(), index).is_some() {
                        continue;
                    }
                    let value = self.compute(node, index, ctx)?;
                    self.memo.insert(node.key(), index, value);
                }
            }
        }

        trace!("field {:?} element {} at t={}", expr.key(), index, time.t);
        self.memo
            .get(expr.key(), index)
            .cloned()
            .ok_or_else(|| LibraryError::evaluation("field memo lost its root value"))
    }

    fn child_value(&self, child: &FieldExpr, index: usize) -> Result<Value, LibraryError> {
        self.memo
            .get(child.key(), index)
            .cloned()
            .ok_or_else(|| LibraryError::evaluation("field child evaluated out of order"))
    }

    fn compute(
        &self,
        node: &FieldExpr,
        index: usize,
        ctx: &FieldEvalContext,
    ) -> Result<Value, LibraryError> {
        match node.kind() {
            FieldKind::Const(value) => Ok(value.clone()),
            FieldKind::Domain => Ok(Value::from(index as f64)),
            FieldKind::Source(source) => {
                let data = ctx.sources.lookup(source).ok_or_else(|| {
                    LibraryError::evaluation(format!(
                        "source {}.{} is not available",
                        source.block, source.port
                    ))
                })?;
                let items = data.as_array().ok_or_else(|| {
                    LibraryError::evaluation(format!(
                        "source {}.{} is a {}, not an indexable array",
                        source.block,
                        source.port,
                        data.type_name()
                    ))
                })?;
                items.get(index).cloned().ok_or_else(|| {
                    LibraryError::evaluation(format!(
                        "source {}.{} has {} items, element index {} out of range",
                        source.block,
                        source.port,
                        items.len(),
                        index
                    ))
                })
            }
            FieldKind::Map {
                function,
                params,
                src,
            } => {
                let arg = self.child_value(src, index)?;
                ctx.functions.get(function)?.apply(&[arg], params)
            }
            FieldKind::Zip {
                function,
                params,
                a,
                b,
            } => {
                let args = [self.child_value(a, index)?, self.child_value(b, index)?];
                ctx.functions.get(function)?.apply(&args, params)
            }
            FieldKind::Adapter { function, src } => {
                let arg = self.child_value(src, index)?;
                ctx.functions.get(function)?.apply(&[arg], &[])
            }
            FieldKind::Bus {
                publishers,
                combine,
            } => {
                let values = publishers
                    .iter()
                    .map(|p| self.child_value(p, index))
                    .collect::<Result<Vec<_>, _>>()?;
                bus::combine(*combine, &values, &Value::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::core::field::functions::{Arity, FieldFunction};
    use crate::core::field::opcode::{BinaryOp, OpCode, UnaryOp};
    use crate::model::patch::CombineMode;

    struct CountingDouble {
        calls: Arc<AtomicUsize>,
    }

    impl FieldFunction for CountingDouble {
        fn arity(&self) -> Arity {
            Arity::Unary
        }

        fn apply(&self, args: &[Value], _params: &[Value]) -> Result<Value, LibraryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            args[0].scale(2.0)
        }

        fn opcode(&self) -> Option<OpCode> {
            None
        }
    }

    fn registry_with_counter() -> (FunctionRegistry, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = FunctionRegistry::new();
        registry.register(
            "double",
            Arc::new(CountingDouble {
                calls: calls.clone(),
            }),
        );
        registry.register_binary("add", BinaryOp::Add);
        registry.register_unary("neg", UnaryOp::Neg);
        (registry, calls)
    }

    fn time() -> TimeContext {
        TimeContext::performance(0.0, 0.0, 0)
    }

    #[test]
    fn test_shared_subexpression_is_computed_once_per_element() {
        let (functions, calls) = registry_with_counter();
        let domain = Domain::from_count("d", 4);
        let sources: HashMap<PortRef, Value> = HashMap::new();
        let ctx = FieldEvalContext {
            domain: &domain,
            frame_id: 1,
            functions: &functions,
            sources: &sources,
        };

        let doubled = FieldExpr::map("double", Vec::new(), FieldExpr::domain());
        let sum = FieldExpr::zip("add", Vec::new(), doubled.clone(), doubled.clone());

        let mut evaluator = FieldEvaluator::new();
        let element = ElementId::new("e3");
        let value = evaluator.evaluate(&sum, &element, &time(), &ctx).unwrap();
        assert_eq!(value, Value::from(12.0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Same element, same frame: served from the memo.
        evaluator.evaluate(&doubled, &element, &time(), &ctx).unwrap();
        evaluator.evaluate(&sum, &element, &time(), &ctx).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // New element invokes the function again.
        evaluator
            .evaluate(&sum, &ElementId::new("e1"), &time(), &ctx)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_new_frame_invalidates_memo() {
        let (functions, calls) = registry_with_counter();
        let domain = Domain::from_count("d", 2);
        let sources: HashMap<PortRef, Value> = HashMap::new();
        let expr = FieldExpr::map("double", Vec::new(), FieldExpr::domain());
        let mut evaluator = FieldEvaluator::new();

        for frame_id in [1u64, 1, 2] {
            let ctx = FieldEvalContext {
                domain: &domain,
                frame_id,
                functions: &functions,
                sources: &sources,
            };
            evaluator
                .evaluate(&expr, &ElementId::new("e0"), &time(), &ctx)
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(evaluator.memo().frame_id(), Some(2));
    }

    #[test]
    fn test_evaluate_domain_counts_once_per_element() {
        let (functions, calls) = registry_with_counter();
        let domain = Domain::from_count("d", 5);
        let sources: HashMap<PortRef, Value> = HashMap::new();
        let ctx = FieldEvalContext {
            domain: &domain,
            frame_id: 9,
            functions: &functions,
            sources: &sources,
        };
        let doubled = FieldExpr::map("double", Vec::new(), FieldExpr::domain());
        let expr = FieldExpr::bus(
            vec![doubled.clone(), FieldExpr::map("neg", Vec::new(), doubled)],
            CombineMode::Sum,
        );
        let mut evaluator = FieldEvaluator::new();
        let values = evaluator.evaluate_domain(&expr, &time(), &ctx).unwrap();
        assert_eq!(values, vec![Value::from(0.0); 5]);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_missing_function_fails() {
        let functions = FunctionRegistry::new();
        let domain = Domain::from_count("d", 1);
        let sources: HashMap<PortRef, Value> = HashMap::new();
        let ctx = FieldEvalContext {
            domain: &domain,
            frame_id: 0,
            functions: &functions,
            sources: &sources,
        };
        let expr = FieldExpr::map("nope", Vec::new(), FieldExpr::domain());
        let err = FieldEvaluator::new()
            .evaluate(&expr, &ElementId::new("e0"), &time(), &ctx)
            .unwrap_err();
        assert!(matches!(err, LibraryError::FunctionNotFound(name) if name == "nope"));
    }

    #[test]
    fn test_source_indexing() {
        let functions = FunctionRegistry::new();
        let domain = Domain::from_count("d", 3);
        let mut sources: HashMap<PortRef, Value> = HashMap::new();
        let radii = PortRef::new("layout", "radii");
        sources.insert(
            radii.clone(),
            Value::Array(vec![Value::from(1.0), Value::from(2.0), Value::from(3.0)]),
        );
        sources.insert(PortRef::new("layout", "scalar"), Value::from(1.0));
        let ctx = FieldEvalContext {
            domain: &domain,
            frame_id: 0,
            functions: &functions,
            sources: &sources,
        };
        let mut evaluator = FieldEvaluator::new();
        let values = evaluator
            .evaluate_domain(&FieldExpr::source(radii), &time(), &ctx)
            .unwrap();
        assert_eq!(values[2], Value::from(3.0));

        let scalar = FieldExpr::source(PortRef::new("layout", "scalar"));
        assert!(evaluator.evaluate_domain(&scalar, &time(), &ctx).is_err());
        let missing = FieldExpr::source(PortRef::new("layout", "missing"));
        assert!(evaluator.evaluate_domain(&missing, &time(), &ctx).is_err());
    }

    #[test]
    fn test_deep_chain_does_not_recurse() {
        // Small stack: evaluating, printing or dropping the chain must not
        // recurse once per node.
        let worker = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let mut functions = FunctionRegistry::new();
                functions.register_unary("neg", UnaryOp::Neg);
                let domain = Domain::from_count("d", 1);
                let sources: HashMap<PortRef, Value> = HashMap::new();
                let ctx = FieldEvalContext {
                    domain: &domain,
                    frame_id: 0,
                    functions: &functions,
                    sources: &sources,
                };
                let mut expr = FieldExpr::constant(Value::from(1.0));
                for _ in 0..200_000 {
                    expr = FieldExpr::map("neg", Vec::new(), expr);
                }
                let value = FieldEvaluator::new()
                    .evaluate(&expr, &ElementId::new("e0"), &time(), &ctx)
                    .unwrap();
                assert!(format!("{:?}", expr).contains("Map"));
                drop(expr);
                value
            })
            .unwrap();
        assert_eq!(worker.join().unwrap(), Value::from(1.0));
    }
}
