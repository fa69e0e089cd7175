//! Serializable data passed in and out of the engine.

pub mod patch;
pub mod render;
pub mod value;
