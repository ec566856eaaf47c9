//! Configuration for the hub server

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::channel::DEFAULT_CHANNEL_LIMIT;
use crate::error::{Error, Result};
use crate::hub::GLOBAL_CHANNEL_LIMIT;

const CONFIG_FILENAME: &str = "wshub.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub hub: HubConfig,
}

/// Bind address for the WebSocket server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8765
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Hub behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Verbose lifecycle logging
    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_channel_limit")]
    pub default_channel_limit: usize,

    #[serde(default = "default_global_limit")]
    pub global_channel_limit: usize,

    /// Channels to create at startup, in addition to "global"
    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
}

fn default_channel_limit() -> usize {
    DEFAULT_CHANNEL_LIMIT
}

fn default_global_limit() -> usize {
    GLOBAL_CHANNEL_LIMIT
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            debug: false,
            default_channel_limit: default_channel_limit(),
            global_channel_limit: default_global_limit(),
            channels: Vec::new(),
        }
    }
}

/// A channel declared in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub limit: Option<usize>,
}

/// Load configuration from wshub.toml, searching upward from the current
/// directory
pub fn load_config() -> Result<Config> {
    let config_path = find_config_file()?;
    load_config_from_path(&config_path)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|_| Error::ConfigNotFound)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}

fn find_config_file() -> Result<PathBuf> {
    let mut current = env::current_dir().map_err(|e| Error::Config(e.to_string()))?;

    loop {
        let config_path = current.join(CONFIG_FILENAME);
        if config_path.exists() {
            return Ok(config_path);
        }

        if !current.pop() {
            return Err(Error::ConfigNotFound);
        }
    }
}
