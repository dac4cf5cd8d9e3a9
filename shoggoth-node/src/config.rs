use std::path::Path;

use serde::Deserialize;

use crate::error::{NodeError, Result};

/// Node configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub network: NetworkConfig,
    pub api: ApiConfig,
    pub peers: PeersConfig,
    pub storage: StorageConfig,
    pub explorer: ExplorerConfig,
    pub db: DbConfig,
    pub dht: DhtConfig,
    pub pins: PinsConfig,
    pub update: UpdateConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    /// The URL other nodes use to reach this node's API.
    pub public_host: String,
    pub allow_private_network: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6969,
            public_host: "http://127.0.0.1:6969".to_string(),
            allow_private_network: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enable: bool,
    pub rate_limiter_requests: u64,
    /// Bucket refill window in milliseconds.
    pub rate_limiter_duration: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { enable: true, rate_limiter_requests: 50, rate_limiter_duration: 60_000 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PeersConfig {
    pub bootstrap_peers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Per-resource cap in megabytes.
    pub max_profile_size: f64,
    /// Total store cap in gigabytes.
    pub limit: f64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { max_profile_size: 50.0, limit: 10.0 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    pub enable: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 6961 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DhtConfig {
    pub enable_updater: bool,
    /// Seconds between gossip rounds.
    pub updater_frequency: u64,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self { enable_updater: true, updater_frequency: 10 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PinsConfig {
    pub allow_publish: bool,
    pub enable_downloader: bool,
    pub downloader_frequency: u64,
    pub enable_updater: bool,
    pub updater_frequency: u64,
}

impl Default for PinsConfig {
    fn default() -> Self {
        Self {
            allow_publish: true,
            enable_downloader: true,
            downloader_frequency: 10,
            enable_updater: true,
            updater_frequency: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub enable: bool,
    /// ShoggothID of the node update resource.
    pub id: String,
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(NodeError::Config(format!(
                "Config file `{}` does not exist",
                path.display()
            )));
        }

        let text = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("could not read `{}`: {e}", path.display())))?;

        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| NodeError::Config(e.to_string()))
    }
}
