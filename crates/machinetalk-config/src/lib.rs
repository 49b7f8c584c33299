//! Minimal configuration loading for machinetalk clients.
//!
//! This crate provides configuration loading with minimal dependencies,
//! kept separate from `machinetalk-core` so the protocol state machines
//! have no opinion on how their settings reach the caller.
//!
//! # Usage
//!
//! ```rust,no_run
//! use machinetalk_config::ClientConfig;
//!
//! let config = ClientConfig::load().expect("failed to load config");
//! println!("status uri: {}", config.status_uri);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/machinetalk/config.toml` (system)
//! 2. `~/.config/machinetalk/config.toml` (user)
//! 3. `./machinetalk.toml` (local override)
//! 4. Environment variables (`MACHINETALK_*`)
//!
//! # Example Config
//!
//! ```toml
//! status_uri = "tcp://192.168.1.10:5558"
//! command_uri = "tcp://192.168.1.10:5559"
//! error_uri = "tcp://192.168.1.10:5560"
//! heartbeat_period_ms = 3000
//! ping_error_threshold = 2
//! status_keepalive_multiplier = 2
//! ```

pub mod loader;

pub use loader::{ConfigSources, discover_config_files_with_override};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

fn default_heartbeat_period_ms() -> u64 {
    3000
}
fn default_ping_error_threshold() -> u32 {
    2
}
fn default_status_keepalive_multiplier() -> u64 {
    2
}

/// The three endpoint URIs and timing knobs a [`machinetalk_core`] client
/// needs before calling `start()`. `machinetalk-core` never depends on
/// this crate; a caller wires the two together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub status_uri: String,
    #[serde(default)]
    pub command_uri: String,
    #[serde(default)]
    pub error_uri: String,
    #[serde(default = "default_heartbeat_period_ms")]
    pub heartbeat_period_ms: u64,
    #[serde(default = "default_ping_error_threshold")]
    pub ping_error_threshold: u32,
    #[serde(default = "default_status_keepalive_multiplier")]
    pub status_keepalive_multiplier: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            status_uri: String::new(),
            command_uri: String::new(),
            error_uri: String::new(),
            heartbeat_period_ms: default_heartbeat_period_ms(),
            ping_error_threshold: default_ping_error_threshold(),
            status_keepalive_multiplier: default_status_keepalive_multiplier(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/machinetalk/config.toml`
    /// 3. `~/.config/machinetalk/config.toml`
    /// 4. `./machinetalk.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return information about sources.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = ClientConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_default_timing() {
        let config = ClientConfig::default();
        assert_eq!(config.heartbeat_period_ms, 3000);
        assert_eq!(config.ping_error_threshold, 2);
        assert_eq!(config.status_keepalive_multiplier, 2);
        assert!(config.status_uri.is_empty());
    }

    #[test]
    fn load_succeeds_with_no_config_files() {
        let config = ClientConfig::load().unwrap();
        assert_eq!(config.heartbeat_period_ms, 3000);
    }
}
