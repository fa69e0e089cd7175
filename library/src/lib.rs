pub mod builtin;
pub mod config;
pub mod core;
pub mod error;
pub mod model;
pub mod runtime;
pub mod util;

pub use crate::config::EngineConfig;
pub use crate::core::compiler::{
    CompileDiagnostic, CompileResult, Compiler, DiagnosticKind, Registries,
};
pub use crate::core::output::PortValue;
pub use crate::core::time::TimeMode;
pub use crate::error::LibraryError;
pub use crate::model::patch::PatchDefinition;
pub use crate::model::render::RenderNode;
pub use crate::model::value::Value;
pub use crate::runtime::{ExecutionDriver, RuntimeInfo};

/// Compiles `patch` against the built-in registries.
pub fn compile(patch: &PatchDefinition) -> (Registries, CompileResult) {
    let registries = Registries::with_builtins();
    let result = Compiler::new(&registries).compile(patch);
    (registries, result)
}
