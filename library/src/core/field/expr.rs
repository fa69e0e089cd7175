//! Lazy per-element expression DAG.
//!
//! A Field value is a tree of immutable, `Arc`-shared nodes. Each node carries a
//! structural key computed at construction: two nodes built from the same kind,
//! payload and children share a key, which is what the memo caches index by.

use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem;
use std::sync::Arc;

use crate::model::patch::{CombineMode, PortRef};
use crate::model::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub u64);

pub enum FieldKind {
    Const(Value),
    /// Yields the element's position in the domain.
    Domain,
    /// Indexes a precomputed block output by element position.
    Source(PortRef),
    Map {
        function: String,
        params: Vec<Value>,
        src: FieldExpr,
    },
    Zip {
        function: String,
        params: Vec<Value>,
        a: FieldExpr,
        b: FieldExpr,
    },
    Bus {
        publishers: Vec<FieldExpr>,
        combine: CombineMode,
    },
    Adapter {
        function: String,
        src: FieldExpr,
    },
}

impl FieldKind {
    fn tag(&self) -> &'static str {
        match self {
            FieldKind::Const(_) => "const",
            FieldKind::Domain => "domain",
            FieldKind::Source(_) => "source",
            FieldKind::Map { .. } => "map",
            FieldKind::Zip { .. } => "zip",
            FieldKind::Bus { .. } => "bus",
            FieldKind::Adapter { .. } => "adapter",
        }
    }

    /// Compares payloads only; children are left to the caller.
    fn same_payload(&self, other: &FieldKind) -> bool {
        match (self, other) {
            (FieldKind::Const(a), FieldKind::Const(b)) => same_bits(a, b),
            (FieldKind::Domain, FieldKind::Domain) => true,
            (FieldKind::Source(a), FieldKind::Source(b)) => a == b,
            (
                FieldKind::Map {
                    function: fa,
                    params: pa,
                    ..
                },
                FieldKind::Map {
                    function: fb,
                    params: pb,
                    ..
                },
            )
            | (
                FieldKind::Zip {
                    function: fa,
                    params: pa,
                    ..
                },
                FieldKind::Zip {
                    function: fb,
                    params: pb,
                    ..
                },
            ) => {
                fa == fb && pa.len() == pb.len() && pa.iter().zip(pb).all(|(a, b)| same_bits(a, b))
            }
            (FieldKind::Bus { combine: a, .. }, FieldKind::Bus { combine: b, .. }) => a == b,
            (FieldKind::Adapter { function: a, .. }, FieldKind::Adapter { function: b, .. }) => {
                a == b
            }
            _ => false,
        }
    }

    /// Moves the children out, leaving a leaf behind.
    fn detach_children(&mut self) -> Vec<FieldExpr> {
        match self {
            FieldKind::Const(_) | FieldKind::Domain | FieldKind::Source(_) => Vec::new(),
            _ => match mem::replace(self, FieldKind::Domain) {
                FieldKind::Map { src, .. } | FieldKind::Adapter { src, .. } => vec![src],
                FieldKind::Zip { a, b, .. } => vec![a, b],
                FieldKind::Bus { publishers, .. } => publishers,
                _ => Vec::new(),
            },
        }
    }
}

/// Shallow: children are printed by key only.
impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Const(value) => f.debug_tuple("Const").field(value).finish(),
            FieldKind::Domain => f.write_str("Domain"),
            FieldKind::Source(source) => f.debug_tuple("Source").field(source).finish(),
            FieldKind::Map {
                function,
                params,
                src,
            } => f
                .debug_struct("Map")
                .field("function", function)
                .field("params", params)
                .field("src", &src.key())
                .finish(),
            FieldKind::Zip {
                function,
                params,
                a,
                b,
            } => f
                .debug_struct("Zip")
                .field("function", function)
                .field("params", params)
                .field("a", &a.key())
                .field("b", &b.key())
                .finish(),
            FieldKind::Bus {
                publishers,
                combine,
            } => f
                .debug_struct("Bus")
                .field(
                    "publishers",
                    &publishers.iter().map(FieldExpr::key).collect::<Vec<_>>(),
                )
                .field("combine", combine)
                .finish(),
            FieldKind::Adapter { function, src } => f
                .debug_struct("Adapter")
                .field("function", function)
                .field("src", &src.key())
                .finish(),
        }
    }
}

pub struct FieldNode {
    key: NodeKey,
    kind: FieldKind,
}

impl fmt::Debug for FieldNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.kind.tag(), self.key)
    }
}

/// Unlinks uniquely owned descendants iteratively, so long chains do not
/// recurse once per node.
impl Drop for FieldNode {
    fn drop(&mut self) {
        let mut pending = self.kind.detach_children();
        while let Some(expr) = pending.pop() {
            if let Ok(mut node) = Arc::try_unwrap(expr.0) {
                pending.extend(node.kind.detach_children());
            }
        }
    }
}

/// Handle to a shared, never-mutated [`FieldNode`].
#[derive(Clone)]
pub struct FieldExpr(Arc<FieldNode>);

impl fmt::Debug for FieldExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldExpr")
            .field("key", &self.key())
            .field("kind", self.kind())
            .finish()
    }
}

/// Structural equality, walked with an explicit stack. Floats compare by bit
/// pattern, so `-0.0` and `0.0` differ.
impl PartialEq for FieldExpr {
    fn eq(&self, other: &Self) -> bool {
        let mut visited: HashSet<(*const FieldNode, *const FieldNode)> = HashSet::new();
        let mut stack = vec![(self, other)];
        while let Some((a, b)) = stack.pop() {
            if a.ptr_eq(b) || !visited.insert((Arc::as_ptr(&a.0), Arc::as_ptr(&b.0))) {
                continue;
            }
            if a.key() != b.key() || !a.kind().same_payload(b.kind()) {
                return false;
            }
            let (left, right) = (a.children(), b.children());
            if left.len() != right.len() {
                return false;
            }
            stack.extend(left.into_iter().zip(right));
        }
        true
    }
}

impl Eq for FieldExpr {}

impl FieldExpr {
    fn build(kind: FieldKind) -> Self {
        let key = structural_key(&kind);
        FieldExpr(Arc::new(FieldNode { key, kind }))
    }

    pub fn constant(value: Value) -> Self {
        Self::build(FieldKind::Const(value))
    }

    pub fn domain() -> Self {
        Self::build(FieldKind::Domain)
    }

    pub fn source(source: PortRef) -> Self {
        Self::build(FieldKind::Source(source))
    }

    pub fn map(function: &str, params: Vec<Value>, src: FieldExpr) -> Self {
        Self::build(FieldKind::Map {
            function: function.to_string(),
            params,
            src,
        })
    }

    pub fn zip(function: &str, params: Vec<Value>, a: FieldExpr, b: FieldExpr) -> Self {
        Self::build(FieldKind::Zip {
            function: function.to_string(),
            params,
            a,
            b,
        })
    }

    pub fn bus(publishers: Vec<FieldExpr>, combine: CombineMode) -> Self {
        Self::build(FieldKind::Bus {
            publishers,
            combine,
        })
    }

    pub fn adapter(function: &str, src: FieldExpr) -> Self {
        Self::build(FieldKind::Adapter {
            function: function.to_string(),
            src,
        })
    }

    pub fn key(&self) -> NodeKey {
        self.0.key
    }

    pub fn kind(&self) -> &FieldKind {
        &self.0.kind
    }

    /// Direct sub-expressions, in evaluation order.
    pub fn children(&self) -> Vec<&FieldExpr> {
        match &self.0.kind {
            FieldKind::Const(_) | FieldKind::Domain | FieldKind::Source(_) => Vec::new(),
            FieldKind::Map { src, .. } | FieldKind::Adapter { src, .. } => vec![src],
            FieldKind::Zip { a, b, .. } => vec![a, b],
            FieldKind::Bus { publishers, .. } => publishers.iter().collect(),
        }
    }

    /// True if both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &FieldExpr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

fn structural_key(kind: &FieldKind) -> NodeKey {
    let mut hasher = DefaultHasher::new();
    match kind {
        FieldKind::Const(value) => {
            0u8.hash(&mut hasher);
            hash_bits(value, &mut hasher);
        }
        FieldKind::Domain => 1u8.hash(&mut hasher),
        FieldKind::Source(source) => {
            2u8.hash(&mut hasher);
            source.hash(&mut hasher);
        }
        FieldKind::Map {
            function,
            params,
            src,
        } => {
            3u8.hash(&mut hasher);
            function.hash(&mut hasher);
            params.iter().for_each(|p| hash_bits(p, &mut hasher));
            src.key().hash(&mut hasher);
        }
        FieldKind::Zip {
            function,
            params,
            a,
            b,
        } => {
            4u8.hash(&mut hasher);
            function.hash(&mut hasher);
            params.iter().for_each(|p| hash_bits(p, &mut hasher));
            a.key().hash(&mut hasher);
            b.key().hash(&mut hasher);
        }
        FieldKind::Bus {
            publishers,
            combine,
        } => {
            5u8.hash(&mut hasher);
            combine.hash(&mut hasher);
            for p in publishers {
                p.key().hash(&mut hasher);
            }
        }
        FieldKind::Adapter { function, src } => {
            6u8.hash(&mut hasher);
            function.hash(&mut hasher);
            src.key().hash(&mut hasher);
        }
    }
    NodeKey(hasher.finish())
}

fn value_bits(value: &Value) -> Option<Vec<u64>> {
    match value {
        Value::Number(n) => Some(vec![n.0.to_bits()]),
        Value::Vec2(v) => Some(vec![v.x.0.to_bits(), v.y.0.to_bits()]),
        Value::Color(c) => Some(
            [c.r, c.g, c.b, c.a]
                .iter()
                .map(|component| component.0.to_bits())
                .collect(),
        ),
        Value::Boolean(_) | Value::String(_) | Value::Array(_) => None,
    }
}

/// Hashes floats by bit pattern rather than by numeric equality.
fn hash_bits(value: &Value, hasher: &mut DefaultHasher) {
    mem::discriminant(value).hash(hasher);
    match (value, value_bits(value)) {
        (_, Some(bits)) => bits.hash(hasher),
        (Value::Array(items), None) => {
            items.len().hash(hasher);
            items.iter().for_each(|item| hash_bits(item, hasher));
        }
        (other, None) => other.hash(hasher),
    }
}

fn same_bits(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_bits(x, y))
        }
        _ => match (value_bits(a), value_bits(b)) {
            (Some(x), Some(y)) => mem::discriminant(a) == mem::discriminant(b) && x == y,
            _ => a == b,
        },
    }
}
