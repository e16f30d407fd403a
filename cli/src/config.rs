// Configuration management for the relaychat CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/relaychat/config.json
// - Linux: ~/.config/relaychat/config.json
// - Windows: %APPDATA%\relaychat\config.json

use anyhow::{Context, Result};
use relaychat_core::DEFAULT_TOPIC;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relay the chat command connects to
    pub relay_url: String,

    /// Port the relay command listens on
    pub relay_port: u16,

    /// Topic joined by chat sessions
    pub topic: String,

    /// Display name
    pub name: String,

    /// Greeting sent to every new peer (empty disables greeter mode)
    pub greeting: Option<String>,

    /// Relay keep-alive interval in seconds
    pub reannounce_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:8080".to_string(),
            relay_port: 8080,
            topic: DEFAULT_TOPIC.to_string(),
            name: "anonymous".to_string(),
            greeting: None,
            reannounce_secs: 30,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("relaychat");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("relaychat");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    /// Where the recovery phrase lives
    pub fn phrase_file() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("recovery-phrase"))
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .validate()
                .with_context(|| format!("Invalid config file {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Apply the same rules `set` enforces to a config read from disk
    pub fn validate(&self) -> Result<()> {
        let mut checked = Config::default();
        checked.set("relay_url", &self.relay_url)?;
        checked.set("topic", &self.topic)?;
        checked.set("name", &self.name)?;
        checked.set("reannounce_secs", &self.reannounce_secs.to_string())?;
        Ok(())
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value (not saved)
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "relay_url" => {
                if !value.starts_with("ws://") && !value.starts_with("wss://") {
                    anyhow::bail!("Relay URL must start with ws:// or wss://");
                }
                self.relay_url = value.to_string();
            }
            "relay_port" => {
                self.relay_port = value.parse().context("Invalid port number")?;
            }
            "topic" => {
                if value.is_empty() {
                    anyhow::bail!("Topic must not be empty");
                }
                self.topic = value.to_string();
            }
            "name" => {
                if value.trim().is_empty() {
                    anyhow::bail!("Name must not be empty");
                }
                self.name = value.trim().to_string();
            }
            "greeting" => {
                self.greeting = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "reannounce_secs" => {
                let secs: u64 = value.parse().context("Invalid number")?;
                if secs == 0 {
                    anyhow::bail!("Re-announce interval must be at least 1 second");
                }
                self.reannounce_secs = secs;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "relay_url" => Some(self.relay_url.clone()),
            "relay_port" => Some(self.relay_port.to_string()),
            "topic" => Some(self.topic.clone()),
            "name" => Some(self.name.clone()),
            "greeting" => self.greeting.clone(),
            "reannounce_secs" => Some(self.reannounce_secs.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("relay_url".to_string(), self.relay_url.clone()),
            ("relay_port".to_string(), self.relay_port.to_string()),
            ("topic".to_string(), self.topic.clone()),
            ("name".to_string(), self.name.clone()),
            (
                "greeting".to_string(),
                self.greeting.clone().unwrap_or_else(|| "(off)".to_string()),
            ),
            ("reannounce_secs".to_string(), format!("{}s", self.reannounce_secs)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.relay_port, 8080);
        assert_eq!(config.topic, DEFAULT_TOPIC);
        assert_eq!(config.name, "anonymous");
        assert!(config.greeting.is_none());
    }

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();
        config.set("relay_port", "9000").unwrap();
        config.set("name", " alice ").unwrap();
        config.set("greeting", "hello!").unwrap();
        assert_eq!(config.get("relay_port").as_deref(), Some("9000"));
        assert_eq!(config.get("name").as_deref(), Some("alice"));
        assert_eq!(config.get("greeting").as_deref(), Some("hello!"));

        config.set("greeting", "").unwrap();
        assert!(config.get("greeting").is_none());
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config.set("relay_port", "not-a-port").is_err());
        assert!(config.set("relay_url", "http://example.com").is_err());
        assert!(config.set("reannounce_secs", "0").is_err());
        assert!(config.set("bogus", "1").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_creates_default_then_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let mut changed = config.clone();
        changed.set("topic", "other-room").unwrap();
        changed.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().topic, "other-room");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"name":"bob"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.name, "bob");
        assert_eq!(config.relay_port, 8080);
    }

    #[test]
    fn test_load_rejects_zero_reannounce() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"name":"bob","reannounce_secs":0}"#).unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("at least 1 second"));
    }

    #[test]
    fn test_validate_matches_set_rules() {
        assert!(Config::default().validate().is_ok());

        let config = Config {
            relay_url: "http://example.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            topic: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
