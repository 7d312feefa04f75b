use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::notify::{ListenerConfig, DEFAULT_BIND_ADDR};

/// Environment variable that overrides the config file location
pub const CONFIG_PATH_ENV: &str = "FRAME_LISTENER_CONFIG";

/// Settings for the bundled `push` endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Address to bind
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub endpoint: EndpointConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            listener: ListenerConfig::default(),
            endpoint: EndpointConfig::default(),
        }
    }
}

impl Config {
    /// Load the config file, writing the defaults on first run
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            if let Err(e) = config.save_to(&config_path) {
                tracing::warn!("Failed to save default config: {}", e);
            }
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// `$FRAME_LISTENER_CONFIG`, or ~/.config/frame-listener/config.toml
    pub fn config_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        let base_dirs = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))?;
        Ok(base_dirs.home_dir().join(".config/frame-listener/config.toml"))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::DEFAULT_ENDPOINT;
    use tempfile::tempdir;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: Config = toml::from_str(
            r#"
            [listener]
            allowed_root = "/dev/shm"
            "#,
        )
        .unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.listener.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.listener.allowed_root, Some(PathBuf::from("/dev/shm")));
        assert!(!config.listener.continue_on_file_error);
        assert_eq!(config.endpoint.bind_addr, DEFAULT_BIND_ADDR);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.listener.endpoint = "ws://127.0.0.1:9100".to_string();
        config.listener.continue_on_file_error = true;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.listener.endpoint, "ws://127.0.0.1:9100");
        assert!(loaded.listener.continue_on_file_error);
        assert_eq!(loaded.listener.allowed_root, None);
    }

    #[test]
    fn test_invalid_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "listener = 3").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
