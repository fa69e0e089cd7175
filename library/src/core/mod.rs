//! Compiler and evaluation core.

pub mod bus;
pub mod compiler;
pub mod domain;
pub mod field;
pub mod graph;
pub mod output;
pub mod state;
pub mod time;
