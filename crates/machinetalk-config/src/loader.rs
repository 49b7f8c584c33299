//! Config file discovery, loading, and environment variable overlay.

use crate::{ClientConfig, ConfigError};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    // System config
    let system = PathBuf::from("/etc/machinetalk/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("machinetalk/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // CLI override takes precedence over local
    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    // Local override (current directory)
    let local = PathBuf::from("machinetalk.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<ClientConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse config from TOML string.
fn parse_toml(contents: &str, path: &Path) -> Result<ClientConfig, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut config = ClientConfig::default();

    if let Some(v) = table.get("status_uri").and_then(|v| v.as_str()) {
        config.status_uri = v.to_string();
    }
    if let Some(v) = table.get("command_uri").and_then(|v| v.as_str()) {
        config.command_uri = v.to_string();
    }
    if let Some(v) = table.get("error_uri").and_then(|v| v.as_str()) {
        config.error_uri = v.to_string();
    }
    if let Some(v) = table.get("heartbeat_period_ms").and_then(|v| v.as_integer()) {
        config.heartbeat_period_ms = v as u64;
    }
    if let Some(v) = table.get("ping_error_threshold").and_then(|v| v.as_integer()) {
        config.ping_error_threshold = v as u32;
    }
    if let Some(v) = table
        .get("status_keepalive_multiplier")
        .and_then(|v| v.as_integer())
    {
        config.status_keepalive_multiplier = v as u64;
    }

    Ok(config)
}

/// Merge two configs, with `overlay` taking precedence field-by-field
/// wherever the overlay differs from the compiled default.
pub fn merge_configs(base: ClientConfig, overlay: ClientConfig) -> ClientConfig {
    let default = ClientConfig::default();
    ClientConfig {
        status_uri: if overlay.status_uri != default.status_uri {
            overlay.status_uri
        } else {
            base.status_uri
        },
        command_uri: if overlay.command_uri != default.command_uri {
            overlay.command_uri
        } else {
            base.command_uri
        },
        error_uri: if overlay.error_uri != default.error_uri {
            overlay.error_uri
        } else {
            base.error_uri
        },
        heartbeat_period_ms: if overlay.heartbeat_period_ms != default.heartbeat_period_ms {
            overlay.heartbeat_period_ms
        } else {
            base.heartbeat_period_ms
        },
        ping_error_threshold: if overlay.ping_error_threshold != default.ping_error_threshold {
            overlay.ping_error_threshold
        } else {
            base.ping_error_threshold
        },
        status_keepalive_multiplier: if overlay.status_keepalive_multiplier
            != default.status_keepalive_multiplier
        {
            overlay.status_keepalive_multiplier
        } else {
            base.status_keepalive_multiplier
        },
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut ClientConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("MACHINETALK_STATUS_URI") {
        config.status_uri = v;
        sources.env_overrides.push("MACHINETALK_STATUS_URI".to_string());
    }
    if let Ok(v) = env::var("MACHINETALK_COMMAND_URI") {
        config.command_uri = v;
        sources.env_overrides.push("MACHINETALK_COMMAND_URI".to_string());
    }
    if let Ok(v) = env::var("MACHINETALK_ERROR_URI") {
        config.error_uri = v;
        sources.env_overrides.push("MACHINETALK_ERROR_URI".to_string());
    }
    if let Ok(v) = env::var("MACHINETALK_HEARTBEAT_PERIOD_MS") {
        if let Ok(parsed) = v.parse() {
            config.heartbeat_period_ms = parsed;
            sources
                .env_overrides
                .push("MACHINETALK_HEARTBEAT_PERIOD_MS".to_string());
        }
    }
    if let Ok(v) = env::var("MACHINETALK_PING_ERROR_THRESHOLD") {
        if let Ok(parsed) = v.parse() {
            config.ping_error_threshold = parsed;
            sources
                .env_overrides
                .push("MACHINETALK_PING_ERROR_THRESHOLD".to_string());
        }
    }
    if let Ok(v) = env::var("MACHINETALK_STATUS_KEEPALIVE_MULTIPLIER") {
        if let Ok(parsed) = v.parse() {
            config.status_keepalive_multiplier = parsed;
            sources
                .env_overrides
                .push("MACHINETALK_STATUS_KEEPALIVE_MULTIPLIER".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn load_from_file_reads_a_real_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machinetalk.toml");
        std::fs::write(
            &path,
            "status_uri = \"tcp://bench:5558\"\nheartbeat_period_ms = 4000\n",
        )
        .unwrap();

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.status_uri, "tcp://bench:5558");
        assert_eq!(config.heartbeat_period_ms, 4000);
    }

    #[test]
    fn discover_config_files_with_override_prefers_cli_path() {
        let dir = tempfile::tempdir().unwrap();
        let override_path = dir.path().join("override.toml");
        std::fs::write(&override_path, "status_uri = \"tcp://override:5558\"\n").unwrap();

        let files = discover_config_files_with_override(Some(&override_path));
        assert_eq!(files.last(), Some(&override_path));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
status_uri = "tcp://localhost:5558"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.status_uri, "tcp://localhost:5558");
        assert_eq!(config.heartbeat_period_ms, 3000);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
status_uri = "tcp://192.168.1.10:5558"
command_uri = "tcp://192.168.1.10:5559"
error_uri = "tcp://192.168.1.10:5560"
heartbeat_period_ms = 5000
ping_error_threshold = 3
status_keepalive_multiplier = 3
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();

        assert_eq!(config.status_uri, "tcp://192.168.1.10:5558");
        assert_eq!(config.command_uri, "tcp://192.168.1.10:5559");
        assert_eq!(config.error_uri, "tcp://192.168.1.10:5560");
        assert_eq!(config.heartbeat_period_ms, 5000);
        assert_eq!(config.ping_error_threshold, 3);
        assert_eq!(config.status_keepalive_multiplier, 3);
    }

    #[test]
    fn merge_prefers_overlay_values_that_differ_from_default() {
        let base = ClientConfig {
            status_uri: "tcp://base:5558".to_string(),
            ..ClientConfig::default()
        };
        let overlay = ClientConfig {
            command_uri: "tcp://overlay:5559".to_string(),
            ..ClientConfig::default()
        };
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.status_uri, "tcp://base:5558");
        assert_eq!(merged.command_uri, "tcp://overlay:5559");
    }
}
