//! Enumerated operations a Field function name resolves to.
//!
//! Handles carry these instead of function references, so a materializer can
//! inspect the computation it runs.

use serde::{Deserialize, Serialize};

use crate::error::LibraryError;
use crate::model::value::{Color, Value, Vec2};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Identity,
    Neg,
    Abs,
    Sin,
    Cos,
    Fract,
    Floor,
    Sqrt,
    /// `x * params[0]`
    Scale,
    /// `x + params[0]`
    Offset,
    /// `clamp(x, params[0], params[1])`
    Clamp,
    /// number → vec2(x, x)
    Splat2,
    /// vec2 → length
    Length,
    /// number → gray color
    Gray,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Pow,
    /// (number, number) → vec2
    MakeVec2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpCode {
    Unary(UnaryOp),
    Binary(BinaryOp),
}

fn param(params: &[Value], index: usize, op: &str) -> Result<f64, LibraryError> {
    params
        .get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| LibraryError::evaluation(format!("{} expects numeric param #{}", op, index)))
}

impl UnaryOp {
    pub fn apply(self, x: &Value, params: &[Value]) -> Result<Value, LibraryError> {
        match self {
            UnaryOp::Identity => Ok(x.clone()),
            UnaryOp::Neg => x.map_numeric(|v| -v),
            UnaryOp::Abs => x.map_numeric(f64::abs),
            UnaryOp::Sin => x.map_numeric(f64::sin),
            UnaryOp::Cos => x.map_numeric(f64::cos),
            UnaryOp::Fract => x.map_numeric(|v| v - v.floor()),
            UnaryOp::Floor => x.map_numeric(f64::floor),
            UnaryOp::Sqrt => x.map_numeric(f64::sqrt),
            UnaryOp::Scale => {
                let k = param(params, 0, "scale")?;
                x.map_numeric(|v| v * k)
            }
            UnaryOp::Offset => {
                let k = param(params, 0, "offset")?;
                x.map_numeric(|v| v + k)
            }
            UnaryOp::Clamp => {
                let lo = param(params, 0, "clamp")?;
                let hi = param(params, 1, "clamp")?;
                x.map_numeric(|v| v.clamp(lo, hi))
            }
            UnaryOp::Splat2 => {
                let v = x
                    .as_f64()
                    .ok_or_else(|| LibraryError::evaluation("splat2 expects a number"))?;
                Ok(Value::from(Vec2::new(v, v)))
            }
            UnaryOp::Length => {
                let v = x
                    .as_vec2()
                    .ok_or_else(|| LibraryError::evaluation("length expects a vec2"))?;
                Ok(Value::from(v.x.into_inner().hypot(v.y.into_inner())))
            }
            UnaryOp::Gray => {
                let v = x
                    .as_f64()
                    .ok_or_else(|| LibraryError::evaluation("gray expects a number"))?;
                Ok(Value::from(Color::rgba(v, v, v, 1.0)))
            }
        }
    }
}

impl BinaryOp {
    pub fn apply(self, a: &Value, b: &Value, _params: &[Value]) -> Result<Value, LibraryError> {
        match self {
            BinaryOp::Add => a.zip_numeric(b, |x, y| x + y),
            BinaryOp::Sub => a.zip_numeric(b, |x, y| x - y),
            BinaryOp::Mul => a.zip_numeric(b, |x, y| x * y),
            BinaryOp::Div => a.zip_numeric(b, |x, y| if y == 0.0 { 0.0 } else { x / y }),
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
            BinaryOp::Pow => a.zip_numeric(b, f64::powf),
            BinaryOp::MakeVec2 => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Ok(Value::from(Vec2::new(x, y))),
                _ => Err(LibraryError::evaluation("vec2 expects two numbers")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unary_ops() {
        let x = Value::from(1.25);
        assert_eq!(UnaryOp::Fract.apply(&x, &[]).unwrap(), Value::from(0.25));
        assert_eq!(
            UnaryOp::Scale.apply(&x, &[Value::from(4.0)]).unwrap(),
            Value::from(5.0)
        );
        assert!(UnaryOp::Scale.apply(&x, &[]).is_err());
        assert_eq!(
            UnaryOp::Clamp
                .apply(&Value::from(7.0), &[Value::from(0.0), Value::from(5.0)])
                .unwrap(),
            Value::from(5.0)
        );
        assert_eq!(
            UnaryOp::Length
                .apply(&Value::from(Vec2::new(3.0, 4.0)), &[])
                .unwrap(),
            Value::from(5.0)
        );
    }

    #[test]
    fn test_binary_ops() {
        let a = Value::from(6.0);
        let b = Value::from(3.0);
        assert_eq!(BinaryOp::Div.apply(&a, &b, &[]).unwrap(), Value::from(2.0));
        assert_eq!(
            BinaryOp::Div.apply(&a, &Value::from(0.0), &[]).unwrap(),
            Value::from(0.0)
        );
        assert_eq!(
            BinaryOp::MakeVec2.apply(&a, &b, &[]).unwrap(),
            Value::from(Vec2::new(6.0, 3.0))
        );
    }
}
