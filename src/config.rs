use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::configure::SequencerSettings;
use crate::discovery::DiscoverySettings;
use crate::error::ConfigError;

const DEFAULT_CONFIG_PATH: &str = "/etc/eip-commission.conf";
const CONFIG_PATH_VAR: &str = "EIP_COMMISSION_CONFIG";
const ENV_PREFIX: &str = "EIP_COMMISSION_";

const KEYS: [&str; 7] = [
    "adapter_address",
    "subnet_mask",
    "scan_window_ms",
    "stale_threshold",
    "operation_timeout_ms",
    "inter_write_delay_ms",
    "log_filter",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Local adapter to scan and configure from; `None` picks one.
    pub adapter_address: Option<Ipv4Addr>,
    /// Adapter mask; `None` takes it from the adapter.
    pub subnet_mask: Option<Ipv4Addr>,
    pub scan_window_ms: u64,
    pub stale_threshold: u32,
    pub operation_timeout_ms: u64,
    pub inter_write_delay_ms: u64,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            adapter_address: None,
            subnet_mask: None,
            scan_window_ms: 3000,
            stale_threshold: 3,
            operation_timeout_ms: 3000,
            inter_write_delay_ms: 100,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads `path`, else `$EIP_COMMISSION_CONFIG`, else the default path,
    /// then applies `EIP_COMMISSION_<KEY>` environment overrides. A missing
    /// file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => std::env::var(CONFIG_PATH_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };

        let mut config = Config::default();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
                path: config_path.display().to_string(),
                source,
            })?;
            config.apply_file(&content)?;
        }

        // Allow environment variable overrides
        for key in KEYS {
            if let Ok(value) = std::env::var(format!("{}{}", ENV_PREFIX, key.to_uppercase())) {
                config.set(key, value.trim())?;
            }
        }

        Ok(config)
    }

    fn apply_file(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                self.set(key.trim(), value.trim())?;
            }
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "adapter_address" => self.adapter_address = Some(value.parse().map_err(|_| invalid())?),
            "subnet_mask" => self.subnet_mask = Some(value.parse().map_err(|_| invalid())?),
            "scan_window_ms" => self.scan_window_ms = value.parse().map_err(|_| invalid())?,
            "stale_threshold" => {
                self.stale_threshold = match value.parse() {
                    Ok(n) if n > 0 => n,
                    _ => return Err(invalid()),
                }
            }
            "operation_timeout_ms" => {
                self.operation_timeout_ms = value.parse().map_err(|_| invalid())?
            }
            "inter_write_delay_ms" => {
                self.inter_write_delay_ms = value.parse().map_err(|_| invalid())?
            }
            "log_filter" => self.log_filter = value.to_string(),
            _ => {}
        }
        Ok(())
    }

    pub fn discovery_settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            window: Duration::from_millis(self.scan_window_ms),
            stale_threshold: self.stale_threshold,
            ..DiscoverySettings::default()
        }
    }

    pub fn sequencer_settings(&self) -> SequencerSettings {
        SequencerSettings {
            operation_timeout: Duration::from_millis(self.operation_timeout_ms),
            inter_write_delay: Duration::from_millis(self.inter_write_delay_ms),
        }
    }
}
