//! Persistent configuration storage.

pub mod config;

pub use config::{load_config, load_config_from, save_config, ConfigError, NodeConfig};
