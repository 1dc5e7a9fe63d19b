//! Configuration file support for sdrproxy-server.
//!
//! Search order: current directory → XDG config dir → `/etc`. Any tier
//! that's missing just falls through to the next; if none exist, the
//! process runs on built-in defaults.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const CONFIG_FILENAME: &str = "sdrproxy.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, String),
    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Top-level config: where to listen, how loud to log, and the
/// `radio_id -> "host:port"` table the registry's device locator consults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: ListenConfig,
    pub log_level: Option<String>,
    pub radios: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut radios = HashMap::new();
        radios.insert("default".to_string(), "127.0.0.1:1234".to_string());
        Self {
            listen: ListenConfig::default(),
            log_level: None,
            radios,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.listen.host, self.listen.port).parse()
    }

    /// Resolves a configured radio id to its TCP address. Returns `None`
    /// for unknown ids, which the registry surfaces as `DeviceUnavailable`.
    pub fn radio_addr(&self, radio_id: &str) -> Option<SocketAddr> {
        self.radios.get(radio_id)?.parse().ok()
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))
    }

    fn default_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILENAME)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("sdrproxy").join(CONFIG_FILENAME));
        }
        paths.push(PathBuf::from("/etc/sdrproxy").join(CONFIG_FILENAME));
        paths
    }

    /// Searches the default paths and loads the first one found, or
    /// returns built-in defaults if none exist.
    pub fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in Self::default_search_paths() {
            if path.exists() {
                let cfg = Self::load_from_file(&path)?;
                return Ok((cfg, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }

    pub fn example_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_a_listen_addr() {
        let cfg = ServerConfig::default();
        assert!(cfg.listen_addr().is_ok());
    }

    #[test]
    fn unknown_radio_id_resolves_to_none() {
        let cfg = ServerConfig::default();
        assert!(cfg.radio_addr("nonexistent").is_none());
    }

    #[test]
    fn example_toml_round_trips() {
        let text = ServerConfig::example_toml();
        let parsed: ServerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.listen.port, ServerConfig::default().listen.port);
    }
}
