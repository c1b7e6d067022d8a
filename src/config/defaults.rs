use super::settings::{
    BlockingConfig, GeoipConfig, LoggingConfig, ProfilerConfig, ServerConfig, StorageConfig,
};

// ---------------------------------------------------------------------------
// Top-level struct defaults
// ---------------------------------------------------------------------------

pub fn default_server_config() -> ServerConfig {
    ServerConfig {
        bind: default_bind(),
        api_key: default_api_key(),
    }
}

pub fn default_storage_config() -> StorageConfig {
    StorageConfig {
        blocks_db: default_blocks_db(),
        cache_db: default_cache_db(),
        data_dir: default_data_dir(),
    }
}

pub fn default_geoip_config() -> GeoipConfig {
    GeoipConfig {
        city_db: default_city_db(),
    }
}

pub fn default_blocking_config() -> BlockingConfig {
    BlockingConfig {
        block_ttl_secs: default_block_ttl_secs(),
        alert_ttl_secs: default_alert_ttl_secs(),
        retention_days: default_retention_days(),
        sweep_interval_secs: default_sweep_interval_secs(),
        firewall: default_firewall(),
    }
}

pub fn default_profiler_config() -> ProfilerConfig {
    ProfilerConfig {
        max_history: default_max_history(),
    }
}

pub fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        dir: default_log_dir(),
    }
}

// ---------------------------------------------------------------------------
// Field defaults
// ---------------------------------------------------------------------------

pub fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

pub fn default_api_key() -> String {
    // Empty key leaves the control surface open.
    String::new()
}

pub fn default_blocks_db() -> String {
    "/opt/rampart/data/blocked_ips.db".to_string()
}

pub fn default_cache_db() -> String {
    "/opt/rampart/data/cache.db".to_string()
}

pub fn default_data_dir() -> String {
    "/opt/rampart/data/events".to_string()
}

pub fn default_city_db() -> String {
    "/opt/rampart/geoip/GeoLite2-City.mmdb".to_string()
}

pub fn default_block_ttl_secs() -> u64 {
    3600
}

pub fn default_alert_ttl_secs() -> u64 {
    3600
}

pub fn default_retention_days() -> u64 {
    30
}

pub fn default_sweep_interval_secs() -> u64 {
    30
}

pub fn default_firewall() -> String {
    "none".to_string()
}

pub fn default_max_history() -> usize {
    1000
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_dir() -> String {
    "/opt/rampart/logs".to_string()
}
