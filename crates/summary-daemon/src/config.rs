//! Configuration loading and management

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for the summary sync daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the case management server
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// API key sent as a bearer token
    #[serde(default)]
    pub api_key: Option<String>,

    /// WebSocket URL of the presence hub (None disables presence)
    #[serde(default)]
    pub presence_url: Option<String>,

    /// Display name announced to other editors
    #[serde(default = "default_actor")]
    pub actor: String,

    /// Quiet period after the last edit before reconciling
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,

    /// Timeout for each REST request
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Presence reconnection behavior
    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Give up after this many attempts (None = keep trying)
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            backoff_factor: default_backoff_factor(),
            max_attempts: None,
        }
    }
}

impl ReconnectSettings {
    /// Wait before retry number `retry` (1-based), capped at the max delay.
    pub fn delay_before(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(64) as i32;
        let secs = self.initial_delay_secs as f64 * self.backoff_factor.max(1.0).powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay_secs as f64))
    }

    fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            bail!(
                "reconnect.backoff_factor must be at least 1.0, got {}",
                self.backoff_factor
            );
        }
        Ok(())
    }
}

fn default_server_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_actor() -> String {
    std::env::var("USER").unwrap_or_else(|_| "summary-sync".to_string())
}

fn default_debounce_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_initial_delay_secs() -> u64 {
    5
}

fn default_max_delay_secs() -> u64 {
    60
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            api_key: None,
            presence_url: None,
            actor: default_actor(),
            debounce_secs: default_debounce_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from the config directory
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config_file = config_dir.join("config.json");

        if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| "Failed to parse config.json")?;
            config
                .reconnect
                .validate()
                .with_context(|| format!("Invalid config file: {:?}", config_file))?;
            tracing::info!("Loaded configuration from {:?}", config_file);
            Ok(config)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_file);
            let config = Config::default();

            std::fs::create_dir_all(config_dir)
                .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;

            // Write default config for reference
            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
            tracing::info!("Created default config at {:?}", config_file);

            Ok(config)
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Default config directory (`~/.config/summary-sync` on Linux).
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("summary-sync"))
        .unwrap_or_else(|| PathBuf::from(".summary-sync"))
}

/// Expand ~ or ~/ prefix to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join("nested");

        let config = Config::load(&config_dir).unwrap();

        assert_eq!(config.debounce_secs, 10);
        assert!(config_dir.join("config.json").exists());

        // Second load reads the written file back
        let reloaded = Config::load(&config_dir).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{"server_url": "https://iris.example.org", "debounce_secs": 3}"#,
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();

        assert_eq!(config.server_url, "https://iris.example.org");
        assert_eq!(config.debounce(), Duration::from_secs(3));
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.reconnect.max_delay_secs, 60);
        assert!(config.presence_url.is_none());
    }

    #[test]
    fn test_invalid_json_is_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.json"), "{ not json").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }

    #[test]
    fn test_backoff_below_one_rejected() {
        for factor in ["0.5", "0", "-1"] {
            let dir = TempDir::new().unwrap();
            std::fs::write(
                dir.path().join("config.json"),
                format!(r#"{{"reconnect": {{"backoff_factor": {}}}}}"#, factor),
            )
            .unwrap();
            let err = Config::load(dir.path()).unwrap_err();
            assert!(format!("{:#}", err).contains("backoff_factor"), "{:#}", err);
        }
    }

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let settings = ReconnectSettings::default();

        // 5s, 10s, 20s, 40s, 60s (capped)
        let delays: Vec<u64> = (1..=6).map(|n| settings.delay_before(n).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);
        assert_eq!(settings.delay_before(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_delay_custom_factor() {
        let settings = ReconnectSettings {
            initial_delay_secs: 1,
            max_delay_secs: 10,
            backoff_factor: 3.0,
            max_attempts: Some(4),
        };
        assert_eq!(settings.delay_before(2), Duration::from_secs(3));
        assert_eq!(settings.delay_before(3), Duration::from_secs(9));
        assert_eq!(settings.delay_before(4), Duration::from_secs(10));
    }

    #[test]
    fn test_expand_tilde_passthrough() {
        assert_eq!(expand_tilde("/tmp/summary.md"), PathBuf::from("/tmp/summary.md"));
        assert_eq!(expand_tilde("relative.md"), PathBuf::from("relative.md"));
    }
}
