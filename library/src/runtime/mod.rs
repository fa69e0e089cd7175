//! Program entry points over a compiled patch.

pub mod driver;

use serde::{Deserialize, Serialize};

pub use driver::ExecutionDriver;

/// Host-supplied information about the output surface.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct RuntimeInfo {
    pub width: f64,
    pub height: f64,
}

impl Default for RuntimeInfo {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
        }
    }
}

/// A discrete event raised by a program. No block emits events yet.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProgramEvent {
    pub name: String,
    pub time_ms: f64,
}
