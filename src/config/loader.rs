/// Configuration loading from TOML file
use std::path::Path;

use crate::error::{Result, SyncError};
use crate::types::Config;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| SyncError::Config(format!("Failed to read config file: {}", e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| SyncError::Config(format!("Failed to parse config: {}", e)))?;

    // Validate config
    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    // Validate provider settings
    if config.provider.base_url.is_empty() {
        return Err(SyncError::Config("provider.base_url is empty".to_string()));
    }

    if config.provider.exchange_timezone.parse::<chrono_tz::Tz>().is_err() {
        return Err(SyncError::Config(format!(
            "Unknown exchange_timezone: {}",
            config.provider.exchange_timezone
        )));
    }

    if config.provider.page_size == 0 {
        return Err(SyncError::Config("provider.page_size must be >= 1".to_string()));
    }

    // Validate sync settings
    if config.sync.max_window_span_days < 1 {
        return Err(SyncError::Config(format!(
            "Invalid max_window_span_days: {}",
            config.sync.max_window_span_days
        )));
    }

    if config.sync.quota_per_window == 0 {
        return Err(SyncError::Config("sync.quota_per_window must be >= 1".to_string()));
    }

    if config.sync.max_concurrency == 0 {
        return Err(SyncError::Config("sync.max_concurrency must be >= 1".to_string()));
    }

    if config.sync.max_attempts == 0 {
        return Err(SyncError::Config("sync.max_attempts must be >= 1".to_string()));
    }

    if config.store.data_dir.is_empty() {
        return Err(SyncError::Config("store.data_dir is empty".to_string()));
    }

    Ok(())
}
