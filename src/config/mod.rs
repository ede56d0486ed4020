//! Configuration module
//!
//! Handles the reflector configuration file and its default location

mod settings;

pub use settings::{capture_path_for, FieldLayout, ReflectorConfig, CAPTURE_SUFFIX};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE: &str = "reflector.toml";

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "reflector", "Reflector").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default configuration file path
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE))
}
