use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use super::defaults;

/// Top-level configuration for the Rampart detection service.
/// Deserializes from a TOML configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "defaults::default_server_config")]
    pub server: ServerConfig,

    #[serde(default = "defaults::default_storage_config")]
    pub storage: StorageConfig,

    #[serde(default = "defaults::default_geoip_config")]
    pub geoip: GeoipConfig,

    #[serde(default = "defaults::default_blocking_config")]
    pub blocking: BlockingConfig,

    #[serde(default = "defaults::default_profiler_config")]
    pub profiler: ProfilerConfig,

    #[serde(default = "defaults::default_logging_config")]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        Ok(settings)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: defaults::default_server_config(),
            storage: defaults::default_storage_config(),
            geoip: defaults::default_geoip_config(),
            blocking: defaults::default_blocking_config(),
            profiler: defaults::default_profiler_config(),
            logging: defaults::default_logging_config(),
        }
    }
}

/// HTTP/WebSocket server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::default_bind")]
    pub bind: String,

    /// Key required on control routes; empty disables the check.
    #[serde(default = "defaults::default_api_key")]
    pub api_key: String,
}

/// Paths for the persisted stores.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::default_blocks_db")]
    pub blocks_db: String,

    #[serde(default = "defaults::default_cache_db")]
    pub cache_db: String,

    /// Directory holding one JSONL file per event-store collection.
    #[serde(default = "defaults::default_data_dir")]
    pub data_dir: String,
}

/// GeoIP database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GeoipConfig {
    #[serde(default = "defaults::default_city_db")]
    pub city_db: String,
}

/// Block lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockingConfig {
    /// Lifetime of a block in seconds; 0 disables automatic expiry.
    #[serde(default = "defaults::default_block_ttl_secs")]
    pub block_ttl_secs: u64,

    /// Lifetime of a cached attack alert in seconds.
    #[serde(default = "defaults::default_alert_ttl_secs")]
    pub alert_ttl_secs: u64,

    /// Days to keep inactive block records before retention purges them.
    #[serde(default = "defaults::default_retention_days")]
    pub retention_days: u64,

    /// Cadence of the expiry/cleanup sweep.
    #[serde(default = "defaults::default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Firewall backend: "none", "iptables", or "ufw".
    #[serde(default = "defaults::default_firewall")]
    pub firewall: String,
}

/// Traffic profiler tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfilerConfig {
    /// Per-address cap on each history deque.
    #[serde(default = "defaults::default_max_history")]
    pub max_history: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::default_log_level")]
    pub level: String,

    #[serde(default = "defaults::default_log_dir")]
    pub dir: String,
}
