//! Configuration module for Tunnelium
//!
//! JSON configuration in the same shape as other tools of this family.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Listen address for the upgrade listener
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Shared secret; its SHA-224 digest is the wire credential
    pub password: String,

    /// DNS relay settings
    #[serde(default)]
    pub dns: DnsConfig,
}

/// Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// DNS relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// DNS-over-HTTPS resolver endpoint
    #[serde(default = "default_resolver")]
    pub resolver: String,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            resolver: default_resolver(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_resolver() -> String {
    "https://1.1.1.1/dns-query".to_string()
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Create a default server configuration
    pub fn default_server() -> Self {
        Config {
            log: LogConfig::default(),
            listen: default_listen(),
            password: "change-me".to_string(),
            dns: DnsConfig::default(),
        }
    }
}
