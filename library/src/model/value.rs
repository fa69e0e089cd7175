//! Plain data values flowing through signals, buses, fields and state memory.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::error::LibraryError;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct Vec2 {
    pub x: OrderedFloat<f64>,
    pub y: OrderedFloat<f64>,
}

impl Vec2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x: OrderedFloat(x),
            y: OrderedFloat(y),
        }
    }
}

/// Linear RGBA color, components nominally in `0.0..=1.0`.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Color {
    pub r: OrderedFloat<f64>,
    pub g: OrderedFloat<f64>,
    pub b: OrderedFloat<f64>,
    pub a: OrderedFloat<f64>,
}

impl Color {
    pub fn rgba(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self {
            r: OrderedFloat(r),
            g: OrderedFloat(g),
            b: OrderedFloat(b),
            a: OrderedFloat(a),
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::rgba(1.0, 1.0, 1.0, 1.0)
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Hash, Debug)]
#[serde(untagged)]
pub enum Value {
    Number(OrderedFloat<f64>),
    Boolean(bool),
    Vec2(Vec2),
    Color(Color),
    String(String),
    Array(Vec<Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Number(OrderedFloat(0.0))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(OrderedFloat(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Vec2> for Value {
    fn from(value: Vec2) -> Self {
        Value::Vec2(value)
    }
}

impl From<Color> for Value {
    fn from(value: Color) -> Self {
        Value::Color(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Boolean(_) => "boolean",
            Value::Vec2(_) => "vec2",
            Value::Color(_) => "color",
            Value::String(_) => "string",
            Value::Array(_) => "array",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(n.into_inner()),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Number(n) => Some(n.into_inner() != 0.0),
            _ => None,
        }
    }

    pub fn as_vec2(&self) -> Option<Vec2> {
        match self {
            Value::Vec2(v) => Some(*v),
            Value::Number(n) => Some(Vec2 { x: *n, y: *n }),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<Color> {
        match self {
            Value::Color(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Number of components the numeric lanes of this value carry.
    fn lanes(&self) -> Option<Vec<f64>> {
        match self {
            Value::Number(n) => Some(vec![n.into_inner()]),
            Value::Vec2(v) => Some(vec![v.x.into_inner(), v.y.into_inner()]),
            Value::Color(c) => Some(vec![
                c.r.into_inner(),
                c.g.into_inner(),
                c.b.into_inner(),
                c.a.into_inner(),
            ]),
            _ => None,
        }
    }

    fn with_lanes(&self, lanes: &[f64]) -> Value {
        match (self, lanes) {
            (Value::Vec2(_), [x, y]) => Value::Vec2(Vec2::new(*x, *y)),
            (Value::Color(_), [r, g, b, a]) => Value::Color(Color::rgba(*r, *g, *b, *a)),
            (_, [n, ..]) => Value::from(*n),
            _ => Value::default(),
        }
    }

    /// Applies `f` lane by lane. A scalar number on either side is broadcast
    /// across the lanes of the other operand; arrays are combined element by element.
    pub fn zip_numeric(
        &self,
        other: &Value,
        f: impl Fn(f64, f64) -> f64 + Copy,
    ) -> Result<Value, LibraryError> {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => {
                if a.len() != b.len() {
                    return Err(LibraryError::evaluation(format!(
                        "array length mismatch: {} vs {}",
                        a.len(),
                        b.len()
                    )));
                }
                a.iter()
                    .zip(b.iter())
                    .map(|(x, y)| x.zip_numeric(y, f))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            (Value::Array(a), scalar) => a
                .iter()
                .map(|x| x.zip_numeric(scalar, f))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            (scalar, Value::Array(b)) => b
                .iter()
                .map(|y| scalar.zip_numeric(y, f))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => {
                let (Some(a), Some(b)) = (self.lanes(), other.lanes()) else {
                    return Err(LibraryError::evaluation(format!(
                        "cannot combine {} with {}",
                        self.type_name(),
                        other.type_name()
                    )));
                };
                let lanes: Vec<f64> = match (a.len(), b.len()) {
                    (n, m) if n == m => a.iter().zip(b.iter()).map(|(x, y)| f(*x, *y)).collect(),
                    (1, _) => b.iter().map(|y| f(a[0], *y)).collect(),
                    (_, 1) => a.iter().map(|x| f(*x, b[0])).collect(),
                    _ => {
                        return Err(LibraryError::evaluation(format!(
                            "cannot combine {} with {}",
                            self.type_name(),
                            other.type_name()
                        )));
                    }
                };
                let shape = if a.len() >= b.len() { self } else { other };
                Ok(shape.with_lanes(&lanes))
            }
        }
    }

    /// Applies `f` to every numeric lane.
    pub fn map_numeric(&self, f: impl Fn(f64) -> f64 + Copy) -> Result<Value, LibraryError> {
        match self {
            Value::Array(items) => items
                .iter()
                .map(|v| v.map_numeric(f))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => {
                let lanes = self.lanes().ok_or_else(|| {
                    LibraryError::evaluation(format!("{} is not numeric", self.type_name()))
                })?;
                let mapped: Vec<f64> = lanes.into_iter().map(f).collect();
                Ok(self.with_lanes(&mapped))
            }
        }
    }

    pub fn add(&self, other: &Value) -> Result<Value, LibraryError> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(*a || *b)),
            _ => self.zip_numeric(other, |a, b| a + b),
        }
    }

    pub fn max(&self, other: &Value) -> Result<Value, LibraryError> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(*a || *b)),
            _ => self.zip_numeric(other, f64::max),
        }
    }

    pub fn min(&self, other: &Value) -> Result<Value, LibraryError> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(*a && *b)),
            _ => self.zip_numeric(other, f64::min),
        }
    }

    pub fn scale(&self, factor: f64) -> Result<Value, LibraryError> {
        self.map_numeric(|x| x * factor)
    }
}
