//! Configuration management for Stockchain

use crate::error::ChainError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Distinguishes snapshots and wallets of nodes sharing a data dir.
    /// Defaults to the API port.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: None,
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            bootstrap_peers: Vec::new(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

impl Config {
    pub fn node_id(&self) -> String {
        self.node
            .id
            .clone()
            .unwrap_or_else(|| self.network.port.to_string())
    }

    fn validate(&self) -> Result<(), ChainError> {
        if self.node.data_dir.as_os_str().is_empty() {
            return Err(ChainError::ConfigError("node.data_dir must not be empty".into()));
        }
        if self.node_id().trim().is_empty() {
            return Err(ChainError::ConfigError("node.id must not be empty".into()));
        }
        Ok(())
    }
}

pub fn parse_config(text: &str) -> Result<Config, ChainError> {
    let config: Config = toml::from_str(text)
        .map_err(|e| ChainError::ConfigError(format!("Invalid config: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Reads `path`, or `config.toml` in the working directory when none is given.
/// A missing file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, ChainError> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    match fs::read_to_string(path) {
        Ok(text) => parse_config(&text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => Err(ChainError::ConfigError(format!("Failed to read {:?}: {}", path, e))),
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_connect_timeout() -> u64 {
    5
}
