use super::types::{CaptureConfig, FlowConfig, SessionConfig, StorageConfig};
use crate::error_handling::types::ConfigError;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::Path;

/// Application configuration covering all four pipeline stages.
///
/// Loaded from a TOML file; every section has defaults so a partial file is
/// enough to get a working setup. Validation runs once at load time and
/// reports the offending field, the pipeline never re-checks these values.
///
/// # Fields Overview
///
/// - `app_uid`: numeric id of the application whose traffic is attributed,
///   supplied by the external discovery collaborator
/// - `capture`: device, addresses and filter inputs for the pcap source
/// - `session`: count-or-time flush policy for the live session table
/// - `flow`: bus endpoint, cache thresholds and retry policy for the HTTP
///   flow reconstruction path
/// - `storage`: output directory for the file-backed storage collaborator
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app_uid: i64,
    pub capture: CaptureConfig,
    pub session: SessionConfig,
    pub flow: FlowConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Reads and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device_ip()?;
        self.proxy_ip()?;

        if self.session.min_sessions_before_flush == 0 {
            return Err(ConfigError::NotInRange(
                "session.min_sessions_before_flush must be at least 1".to_string(),
            ));
        }
        if self.flow.storage_workers == 0 {
            return Err(ConfigError::NotInRange(
                "flow.storage_workers must be at least 1".to_string(),
            ));
        }
        if self.flow.retry_max_attempts == 0 {
            return Err(ConfigError::NotInRange(
                "flow.retry_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.flow.hard_cache_capacity <= self.flow.soft_flush_count {
            return Err(ConfigError::BadThreshold(format!(
                "flow.hard_cache_capacity ({}) must exceed flow.soft_flush_count ({})",
                self.flow.hard_cache_capacity, self.flow.soft_flush_count
            )));
        }
        Ok(())
    }

    pub fn device_ip(&self) -> Result<IpAddr, ConfigError> {
        self.capture
            .device_ip
            .parse()
            .map_err(|_| ConfigError::BadIpFormatting(self.capture.device_ip.clone()))
    }

    pub fn proxy_ip(&self) -> Result<IpAddr, ConfigError> {
        self.capture
            .proxy_ip
            .parse()
            .map_err(|_| ConfigError::BadIpFormatting(self.capture.proxy_ip.clone()))
    }
}
