//! Configuration: a JSON file, then environment overrides.

use canvas_sync::SyncSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8765";
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/canvas-anki/config.json";

pub const ENV_ENDPOINT: &str = "ANKI_CONNECT_URL";
pub const ENV_API_KEY: &str = "ANKI_CONNECT_KEY";
pub const ENV_DECK: &str = "CANVAS_ANKI_DECK";

/// How to reach AnkiConnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionSettings {
    pub endpoint: String,
    /// Sent as `key` when AnkiConnect has an API key configured.
    pub api_key: Option<String>,
    /// Total attempts per call, including the first.
    pub retry_attempts: u32,
    pub timeout_ms: u64,
    /// Linear backoff step between attempts.
    pub retry_delay_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            retry_attempts: 3,
            timeout_ms: 10_000,
            retry_delay_ms: 500,
        }
    }
}

impl ConnectionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(
            self.retry_attempts.max(1),
            Duration::from_millis(self.retry_delay_ms),
        )
    }
}

/// Full tool configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionSettings,
    pub sync: SyncSettings,
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (expand_tilde(DEFAULT_CONFIG_PATH), false),
        };

        if !path.exists() {
            if required {
                return Err(ConfigError::NotFound(path));
            }
            return Ok(Self::default());
        }

        let json = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_json(&json)?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file, then apply process environment overrides.
    pub fn from_file_and_env(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    /// Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = get(ENV_ENDPOINT) {
            self.connection.endpoint = endpoint;
        }
        if let Some(key) = get(ENV_API_KEY) {
            self.connection.api_key = Some(key);
        }
        if let Some(deck) = get(ENV_DECK) {
            self.sync.deck_name = deck;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = &self.connection.endpoint;
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidEndpoint(endpoint.clone()));
        }
        if self.sync.deck_name.trim().is_empty() {
            return Err(ConfigError::EmptyDeckName);
        }
        Ok(())
    }
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

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("Failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("AnkiConnect endpoint must be an http(s) URL, got '{0}'")]
    InvalidEndpoint(String),

    #[error("Deck name must not be empty")]
    EmptyDeckName,
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_sync::CanvasColor;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.connection.endpoint, "http://127.0.0.1:8765");
        assert_eq!(config.connection.retry_attempts, 3);
        assert_eq!(config.connection.timeout(), Duration::from_secs(10));
        assert_eq!(config.sync.deck_name, "Obsidian Canvas");
        assert_eq!(config.sync.model_name, "Obsidian Canvas Card");
        assert!(config.sync.incremental_sync);
        assert!(!config.sync.force_sync);
    }

    #[test]
    fn test_partial_file() {
        let config = Config::from_json(
            r##"{
                "connection": { "apiKey": "secret", "timeoutMs": 2000 },
                "sync": { "deckName": "Biology", "colors": ["4", "#FF8800"], "batchSize": 25 }
            }"##,
        )
        .unwrap();

        assert_eq!(config.connection.api_key.as_deref(), Some("secret"));
        assert_eq!(config.connection.timeout_ms, 2000);
        assert_eq!(config.connection.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.sync.deck_name, "Biology");
        assert_eq!(config.sync.batch_size, 25);
        assert_eq!(
            config.sync.colors,
            vec![CanvasColor::Green, CanvasColor::Custom("#ff8800".into())]
        );
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_ENDPOINT, "http://anki.local:9000"),
            (ENV_API_KEY, "k"),
            (ENV_DECK, "   "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.connection.endpoint, "http://anki.local:9000");
        assert_eq!(config.connection.api_key.as_deref(), Some("k"));
        assert_eq!(config.sync.deck_name, "Obsidian Canvas");
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        let result = Config::from_json(r#"{"connection": {"endpoint": "localhost:8765"}}"#);
        assert!(matches!(result, Err(ConfigError::InvalidEndpoint(_))));
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = Config::load(Some(Path::new("/nonexistent/canvas-anki.json")));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"sync": {"divider": "???"}}"#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.sync.divider, "???");
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde("~/notes"), home.join("notes"));
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }
}
