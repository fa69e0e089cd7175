//! Patch definition: the user-authored block graph handed to the compiler.

use serde::{Deserialize, Serialize};

use crate::model::value::Value;

/// A block instance. `config` is opaque to the compiler and interpreted by the
/// block's own lowering.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BlockInstance {
    pub id: String,
    #[serde(rename = "type")]
    pub type_id: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl BlockInstance {
    pub fn new(id: &str, type_id: &str) -> Self {
        Self {
            id: id.to_string(),
            type_id: type_id.to_string(),
            config: serde_json::Value::Null,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// Identifies a specific port on a specific block.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRef {
    pub block: String,
    pub port: String,
}

impl PortRef {
    pub fn new(block: &str, port: &str) -> Self {
        Self {
            block: block.to_string(),
            port: port.to_string(),
        }
    }
}

/// A point-to-point wire from an output port to an input port.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Connection {
    pub from: PortRef,
    pub to: PortRef,
}

impl Connection {
    pub fn new(from: PortRef, to: PortRef) -> Self {
        Self { from, to }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CombineMode {
    Sum,
    Average,
    Max,
    Min,
    Last,
    Layer,
}

impl std::fmt::Display for CombineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CombineMode::Sum => "sum",
            CombineMode::Average => "average",
            CombineMode::Max => "max",
            CombineMode::Min => "min",
            CombineMode::Last => "last",
            CombineMode::Layer => "layer",
        };
        write!(f, "{}", s)
    }
}

/// A named broadcast channel.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Bus {
    pub id: String,
    pub combine: CombineMode,
    #[serde(default)]
    pub default: Value,
}

impl Bus {
    pub fn new(id: &str, combine: CombineMode, default: Value) -> Self {
        Self {
            id: id.to_string(),
            combine,
            default,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Publisher {
    pub block: String,
    pub bus: String,
    pub port: String,
    /// Publishers are combined in ascending `sort_key` order.
    #[serde(default)]
    pub sort_key: i64,
    #[serde(default)]
    pub disabled: bool,
}

impl Publisher {
    pub fn new(block: &str, bus: &str, port: &str, sort_key: i64) -> Self {
        Self {
            block: block.to_string(),
            bus: bus.to_string(),
            port: port.to_string(),
            sort_key,
            disabled: false,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Listener {
    pub block: String,
    pub bus: String,
    pub port: String,
    #[serde(default)]
    pub disabled: bool,
}

impl Listener {
    pub fn new(block: &str, bus: &str, port: &str) -> Self {
        Self {
            block: block.to_string(),
            bus: bus.to_string(),
            port: port.to_string(),
            disabled: false,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct PatchDefinition {
    pub blocks: Vec<BlockInstance>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub buses: Vec<Bus>,
    #[serde(default)]
    pub publishers: Vec<Publisher>,
    #[serde(default)]
    pub listeners: Vec<Listener>,
}

impl PatchDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(json_str: &str) -> Result<Self, serde_json::Error> {
        let patch: PatchDefinition = serde_json::from_str(json_str)?;

        Ok(patch)
    }

    pub fn save(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn add_block(&mut self, block: BlockInstance) -> &mut Self {
        self.blocks.push(block);
        self
    }

    pub fn connect(&mut self, from: (&str, &str), to: (&str, &str)) -> &mut Self {
        self.connections.push(Connection::new(
            PortRef::new(from.0, from.1),
            PortRef::new(to.0, to.1),
        ));
        self
    }

    pub fn add_bus(&mut self, bus: Bus) -> &mut Self {
        self.buses.push(bus);
        self
    }

    pub fn publish(&mut self, publisher: Publisher) -> &mut Self {
        self.publishers.push(publisher);
        self
    }

    pub fn listen(&mut self, listener: Listener) -> &mut Self {
        self.listeners.push(listener);
        self
    }

    pub fn get_block(&self, id: &str) -> Option<&BlockInstance> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn get_bus(&self, id: &str) -> Option<&Bus> {
        self.buses.iter().find(|b| b.id == id)
    }
}
