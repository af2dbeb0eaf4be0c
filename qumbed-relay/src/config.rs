//! Relay configuration, loaded from a TOML file (default: `relay.toml`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Minimum session idle timeout in seconds. Subscriptions sit silent for
/// minutes between messages; anything shorter would reap them.
pub const MIN_IDLE_TIMEOUT_SECS: u64 = 300;

/// Root configuration for the relay binary.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the QUIC listener (default: `0.0.0.0:6121`).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Session idle timeout in seconds (default: 300, also the floor).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl ServerConfig {
    /// The effective idle timeout, never below the
    /// [`MIN_IDLE_TIMEOUT_SECS`] floor.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(MIN_IDLE_TIMEOUT_SECS))
    }
}

fn default_bind_address() -> String {
    "0.0.0.0:6121".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    MIN_IDLE_TIMEOUT_SECS
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                source: e,
            })?;
        if config.server.idle_timeout_secs < MIN_IDLE_TIMEOUT_SECS {
            tracing::warn!(
                configured = config.server.idle_timeout_secs,
                floor = MIN_IDLE_TIMEOUT_SECS,
                "idle_timeout_secs below the floor, raising it"
            );
            config.server.idle_timeout_secs = MIN_IDLE_TIMEOUT_SECS;
        }
        Ok(config)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse the configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:6121");
        assert_eq!(config.server.idle_timeout_secs, 300);
        assert_eq!(config.server.idle_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:5000"
idle_timeout_secs = 600
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:5000");
        assert_eq!(config.server.idle_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:6121");
        assert_eq!(config.server.idle_timeout_secs, 300);
    }

    #[test]
    fn idle_timeout_accessor_enforces_the_floor() {
        let toml = r#"
[server]
idle_timeout_secs = 60
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.idle_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn from_file_raises_sub_floor_idle_timeout() {
        let path = std::env::temp_dir().join("qumbed-relay-config-floor-test.toml");
        std::fs::write(&path, "[server]\nidle_timeout_secs = 60\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.server.idle_timeout_secs, MIN_IDLE_TIMEOUT_SECS);
    }

    #[test]
    fn from_file_keeps_values_above_the_floor() {
        let path = std::env::temp_dir().join("qumbed-relay-config-above-test.toml");
        std::fs::write(&path, "[server]\nidle_timeout_secs = 900\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.server.idle_timeout_secs, 900);
        assert_eq!(config.server.idle_timeout(), Duration::from_secs(900));
    }
}
