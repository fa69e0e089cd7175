//! Declarative state shapes and the live memory allocated from them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::LibraryError;
use crate::model::value::Value;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StateFieldType {
    Number,
    Vec2,
    Color,
    Boolean,
    /// Fixed-size array of numbers.
    Buffer,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StateFieldSpec {
    #[serde(rename = "type")]
    pub field_type: StateFieldType,
    pub default: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
}

impl StateFieldSpec {
    pub fn number(default: f64) -> Self {
        Self {
            field_type: StateFieldType::Number,
            default: Value::from(default),
            size: None,
        }
    }

    pub fn boolean(default: bool) -> Self {
        Self {
            field_type: StateFieldType::Boolean,
            default: Value::from(default),
            size: None,
        }
    }

    pub fn buffer(size: usize, fill: f64) -> Self {
        Self {
            field_type: StateFieldType::Buffer,
            default: Value::from(fill),
            size: Some(size),
        }
    }

    fn initial_value(&self) -> Value {
        match (self.field_type, self.size) {
            (StateFieldType::Buffer, Some(size)) => Value::Array(vec![self.default.clone(); size]),
            _ => self.default.clone(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        let matches = match self.field_type {
            StateFieldType::Number | StateFieldType::Buffer => {
                matches!(self.default, Value::Number(_))
            }
            StateFieldType::Vec2 => matches!(self.default, Value::Vec2(_)),
            StateFieldType::Color => matches!(self.default, Value::Color(_)),
            StateFieldType::Boolean => matches!(self.default, Value::Boolean(_)),
        };
        if !matches {
            return Err(format!(
                "default {} does not match declared type {:?}",
                self.default.type_name(),
                self.field_type
            ));
        }
        if self.field_type == StateFieldType::Buffer && self.size.is_none() {
            return Err("buffer field needs a size".to_string());
        }
        Ok(())
    }
}

/// Named state fields. Data only; behavior lives in the block.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct StateShape {
    pub fields: BTreeMap<String, StateFieldSpec>,
}

impl StateShape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, spec: StateFieldSpec) -> Self {
        self.fields.insert(name.to_string(), spec);
        self
    }

    /// Checks every default against its declared type.
    pub fn validate(&self) -> Result<(), String> {
        for (name, spec) in &self.fields {
            spec.validate()
                .map_err(|reason| format!("state field '{}': {}", name, reason))?;
        }
        Ok(())
    }
}

/// Live state of one block instance.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct StateMemory {
    created_frame: u64,
    values: BTreeMap<String, Value>,
}

impl StateMemory {
    pub fn from_shape(shape: &StateShape, frame: u64) -> Self {
        Self {
            created_frame: frame,
            values: shape
                .fields
                .iter()
                .map(|(name, spec)| (name.clone(), spec.initial_value()))
                .collect(),
        }
    }

    pub fn created_frame(&self) -> u64 {
        self.created_frame
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn number(&self, name: &str) -> f64 {
        self.get(name).and_then(Value::as_f64).unwrap_or(0.0)
    }

    /// Writes an existing field. Fields outside the shape are rejected.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), LibraryError> {
        match self.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(LibraryError::evaluation(format!(
                "state field '{}' is not part of the shape",
                name
            ))),
        }
    }

    pub fn set_number(&mut self, name: &str, value: f64) -> Result<(), LibraryError> {
        self.set(name, Value::from(value))
    }
}

/// All live state memory of a compiled program, keyed by block id.
#[derive(Serialize, Clone, Debug, Default)]
pub struct StateTable {
    memories: BTreeMap<String, StateMemory>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates memory for `block_id`. A block is allocated at most once.
    pub fn allocate(&mut self, block_id: &str, memory: StateMemory) -> Result<(), LibraryError> {
        if self.memories.contains_key(block_id) {
            return Err(LibraryError::graph(format!(
                "state for block '{}' is already allocated",
                block_id
            )));
        }
        self.memories.insert(block_id.to_string(), memory);
        Ok(())
    }

    /// Replaces existing memory, e.g. on reset.
    pub fn replace(&mut self, block_id: &str, memory: StateMemory) -> Result<(), LibraryError> {
        let slot = self.get_mut(block_id)?;
        *slot = memory;
        Ok(())
    }

    pub fn get(&self, block_id: &str) -> Result<&StateMemory, LibraryError> {
        self.memories
            .get(block_id)
            .ok_or_else(|| LibraryError::MissingState(block_id.to_string()))
    }

    pub fn get_mut(&mut self, block_id: &str) -> Result<&mut StateMemory, LibraryError> {
        self.memories
            .get_mut(block_id)
            .ok_or_else(|| LibraryError::MissingState(block_id.to_string()))
    }

    pub fn remove(&mut self, block_id: &str) -> Option<StateMemory> {
        self.memories.remove(block_id)
    }

    pub fn len(&self) -> usize {
        self.memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }

    pub fn block_ids(&self) -> Vec<&str> {
        self.memories.keys().map(String::as_str).collect()
    }

    pub fn clear(&mut self) {
        self.memories.clear();
    }

    pub fn to_json(&self) -> Result<String, LibraryError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
