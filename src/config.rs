//! JSON configuration file loading
//!
//! The `-c/--cfg_path` file carries the listen address as
//! `{"server_address": "...", "server_port": ...}`.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

/// Server configuration as stored on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub server_address: String,
    pub server_port: u16,
}

impl ServerConfig {
    /// The `host:port` string to bind.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.server_address, self.server_port)
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to open configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode configuration file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Load the configuration from a JSON file.
pub fn load(path: &Path) -> Result<ServerConfig, ConfigError> {
    info!("Loading configuration from {}", path.display());
    let contents = std::fs::read_to_string(path)?;
    let config: ServerConfig = serde_json::from_str(&contents)?;
    info!("Configuration loaded successfully: {:?}", config);
    Ok(config)
}
