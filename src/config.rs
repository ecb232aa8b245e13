use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::mode::StorageMode;

const CONFIG_FILE_NAME: &str = "config.toml";
const APP_DIR_NAME: &str = "pharmacy-portal";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub sheets: SheetsConfig,
    pub sync: SyncConfig,
}

/// Local storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Mode to try first when no preference has been saved yet
    pub preferred_mode: StorageMode,
    /// Data directory (empty = default data dir)
    pub data_dir: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            preferred_mode: StorageMode::Server,
            data_dir: None,
        }
    }
}

/// REST server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// API base, e.g. "http://localhost:3000/api" (None = no server)
    pub base_url: Option<String>,
    /// Connectivity probe timeout in milliseconds
    pub probe_timeout_ms: u64,
    /// Timeout for every other request in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: Some("http://localhost:3000/api".to_string()),
            probe_timeout_ms: 2000,
            request_timeout_ms: 10_000,
        }
    }
}

/// Spreadsheet script endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetsConfig {
    /// Pause between queued writes in milliseconds
    pub write_cooldown_ms: u64,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            write_cooldown_ms: 300,
            request_timeout_ms: 30_000,
        }
    }
}

/// Background sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote poll interval in seconds
    pub poll_interval_secs: u64,
    /// Seed sample rows into empty tables when no backend is reachable
    pub seed_sample_data: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            seed_sample_data: true,
        }
    }
}

impl ServerConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl SheetsConfig {
    pub fn write_cooldown(&self) -> Duration {
        Duration::from_millis(self.write_cooldown_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join(APP_DIR_NAME);

        fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from file, or create default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .context("Failed to read config file")?;

            let config: Config = toml::from_str(&contents)
                .context("Failed to parse config file")?;

            Ok(config)
        } else {
            // Create default config and save it
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Directory holding the mirror database and mode file
    pub fn data_dir(&self) -> Result<PathBuf> {
        let dir = match self.storage.data_dir.as_deref() {
            Some(custom) if !custom.is_empty() => PathBuf::from(custom),
            _ => dirs::data_dir()
                .context("Failed to get data directory")?
                .join(APP_DIR_NAME),
        };

        fs::create_dir_all(&dir)
            .context("Failed to create data directory")?;
        Ok(dir)
    }

    /// Generate example config content for documentation
    pub fn example_config() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.storage.preferred_mode, StorageMode::Server);
        assert!(config.storage.data_dir.is_none());
        assert_eq!(config.server.base_url.as_deref(), Some("http://localhost:3000/api"));
        assert_eq!(config.server.probe_timeout(), Duration::from_secs(2));
        assert_eq!(config.sheets.write_cooldown(), Duration::from_millis(300));
        assert_eq!(config.sync.poll_interval(), Duration::from_secs(30));
        assert!(config.sync.seed_sample_data);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let partial_toml = r#"
[server]
base_url = "http://192.168.1.100:8080/api"
"#;

        let config: Config = toml::from_str(partial_toml).unwrap();

        assert_eq!(config.server.base_url.as_deref(), Some("http://192.168.1.100:8080/api"));
        assert_eq!(config.server.probe_timeout_ms, 2000);
        assert_eq!(config.sheets.write_cooldown_ms, 300);
        assert_eq!(config.sync.poll_interval_secs, 30);
    }

    #[test]
    fn test_full_config_parsing() {
        let full_toml = r#"
[storage]
preferred_mode = "sheets"
data_dir = "/srv/pharmacy"

[server]
base_url = "https://portal.example/api"
probe_timeout_ms = 500
request_timeout_ms = 4000

[sheets]
write_cooldown_ms = 1000
request_timeout_ms = 60000

[sync]
poll_interval_secs = 10
seed_sample_data = false
"#;

        let config: Config = toml::from_str(full_toml).unwrap();

        assert_eq!(config.storage.preferred_mode, StorageMode::Sheets);
        assert_eq!(config.storage.data_dir, Some("/srv/pharmacy".to_string()));
        assert_eq!(config.server.probe_timeout(), Duration::from_millis(500));
        assert_eq!(config.server.request_timeout(), Duration::from_secs(4));
        assert_eq!(config.sheets.write_cooldown(), Duration::from_secs(1));
        assert_eq!(config.sheets.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.sync.poll_interval(), Duration::from_secs(10));
        assert!(!config.sync.seed_sample_data);
    }

    #[test]
    fn test_zero_poll_interval_clamped() {
        let config: Config = toml::from_str("[sync]\npoll_interval_secs = 0\n").unwrap();
        assert_eq!(config.sync.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_example_config_is_valid() {
        let example = Config::example_config();
        let parsed: Result<Config, _> = toml::from_str(&example);
        assert!(parsed.is_ok(), "Example config should be valid TOML");
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = "this is not valid [[ toml";
        let result: Result<Config, _> = toml::from_str(invalid_toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.sync.poll_interval_secs, 30);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.server.base_url, config.server.base_url);
    }

    #[test]
    fn test_custom_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("data");
        let mut config = Config::default();
        config.storage.data_dir = Some(target.to_string_lossy().into_owned());

        assert_eq!(config.data_dir().unwrap(), target);
        assert!(target.exists());
    }
}
