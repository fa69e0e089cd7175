//! Engine configuration, stored as TOML.

use std::fs;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::core::time::TimeMode;
use crate::error::LibraryError;

pub const DEFAULT_MAX_PROGRAM_NODES: usize = 4096;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Time mode a new driver starts in.
    pub initial_mode: TimeMode,
    /// Port names searched, in order, for the frame's render tree.
    pub render_ports: Vec<String>,
    /// Field program arena size past which it is rebuilt between frames.
    pub max_program_nodes: usize,
    pub fps: f64,
    pub frames: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_mode: TimeMode::Performance,
            render_ports: ["render", "renderTree", "tree", "output", "out"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            max_program_nodes: DEFAULT_MAX_PROGRAM_NODES,
            fps: 30.0,
            frames: 1,
        }
    }
}

impl EngineConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self, LibraryError> {
        toml::from_str(toml_str).map_err(|e| LibraryError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, LibraryError> {
        toml::to_string_pretty(self).map_err(|e| LibraryError::Config(e.to_string()))
    }
}

/// Loads the config at `path`. Missing, unreadable or invalid files yield the
/// defaults.
pub fn load_config(path: &Path) -> EngineConfig {
    if path.exists() {
        match fs::read_to_string(path) {
            Ok(toml_str) => match EngineConfig::from_toml(&toml_str) {
                Ok(config) => {
                    info!("Loaded engine config from {}", path.display());
                    return config;
                }
                Err(e) => {
                    warn!("Failed to parse config file, using defaults: {}", e);
                }
            },
            Err(e) => {
                warn!("Failed to read config file, using defaults: {}", e);
            }
        }
    } else {
        warn!("Config file {} not found, using defaults", path.display());
    }
    EngineConfig::default()
}

pub fn save_config(config: &EngineConfig, path: &Path) -> Result<(), LibraryError> {
    let toml_str = config.to_toml()?;
    fs::write(path, toml_str)?;
    info!("Engine config saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml("initial_mode = \"scrub\"\nfps = 60.0\n").unwrap();
        assert_eq!(config.initial_mode, TimeMode::Scrub);
        assert_eq!(config.fps, 60.0);
        assert_eq!(config.render_ports[0], "render");
        assert_eq!(config.max_program_nodes, DEFAULT_MAX_PROGRAM_NODES);
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let dir = std::env::temp_dir().join("patchflow_config_test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.toml");
        fs::write(&path, "fps = \"fast\"").unwrap();
        assert_eq!(load_config(&path), EngineConfig::default());
        assert_eq!(
            load_config(&dir.join("missing.toml")),
            EngineConfig::default()
        );
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join("patchflow_config_test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("saved.toml");
        let config = EngineConfig {
            frames: 12,
            ..EngineConfig::default()
        };
        save_config(&config, &path).unwrap();
        assert_eq!(load_config(&path), config);
    }
}
