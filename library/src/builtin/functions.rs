use crate::core::field::{BinaryOp, FunctionRegistry, UnaryOp};

const UNARY: &[(&str, UnaryOp)] = &[
    ("identity", UnaryOp::Identity),
    ("neg", UnaryOp::Neg),
    ("abs", UnaryOp::Abs),
    ("sin", UnaryOp::Sin),
    ("cos", UnaryOp::Cos),
    ("fract", UnaryOp::Fract),
    ("floor", UnaryOp::Floor),
    ("sqrt", UnaryOp::Sqrt),
    ("scale", UnaryOp::Scale),
    ("offset", UnaryOp::Offset),
    ("clamp", UnaryOp::Clamp),
    ("splat2", UnaryOp::Splat2),
    ("length", UnaryOp::Length),
    ("gray", UnaryOp::Gray),
];

const BINARY: &[(&str, BinaryOp)] = &[
    ("add", BinaryOp::Add),
    ("sub", BinaryOp::Sub),
    ("mul", BinaryOp::Mul),
    ("div", BinaryOp::Div),
    ("min", BinaryOp::Min),
    ("max", BinaryOp::Max),
    ("pow", BinaryOp::Pow),
    ("vec2", BinaryOp::MakeVec2),
];

/// Adds the opcode-backed catalog functions.
pub fn register_functions(functions: &mut FunctionRegistry) {
    for (name, op) in UNARY {
        functions.register_unary(name, *op);
    }
    for (name, op) in BINARY {
        functions.register_binary(name, *op);
    }
}
