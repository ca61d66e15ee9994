//! Configuration for the backend endpoint and channel behavior.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flag (`--backend`, applied by the CLI)
//! 2. Environment variable (CYPHER_BACKEND_URL)
//! 3. Config file (.cypher/config.yaml, then ~/.cypher/config.yaml)
//! 4. Defaults (http://localhost:8000)
//!
//! Config file discovery:
//! - Searches current directory and parents for .cypher/config.yaml
//! - Falls back to the user-level file in the home directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

use crate::adapters::ChannelSettings;

/// Backend used when nothing else is configured
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Environment variable selecting the backend
pub const BACKEND_URL_ENV: &str = "CYPHER_BACKEND_URL";

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelConfig {
    pub reconnect_initial_ms: Option<u64>,
    pub reconnect_max_ms: Option<u64>,
    pub connect_timeout_seconds: Option<u64>,
}

/// Resolved configuration
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Backend base URL
    pub backend_url: Url,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Channel timing
    pub channel: ChannelTuning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTuning {
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    pub connect_timeout_seconds: u64,
}

impl Default for ChannelTuning {
    fn default() -> Self {
        Self {
            reconnect_initial_ms: 1000,
            reconnect_max_ms: 30_000,
            connect_timeout_seconds: 10,
        }
    }
}

impl ResolvedConfig {
    /// Override the backend (command-line flag)
    pub fn with_backend(mut self, url: &str) -> Result<Self> {
        self.backend_url = parse_backend_url(url)?;
        Ok(self)
    }

    /// Channel settings for this configuration
    pub fn channel_settings(&self) -> ChannelSettings {
        let mut settings = ChannelSettings::new(self.backend_url.clone());
        settings.reconnect_initial = Duration::from_millis(self.channel.reconnect_initial_ms);
        settings.reconnect_max = Duration::from_millis(self.channel.reconnect_max_ms);
        settings.handshake_timeout = self.connect_timeout();
        settings
    }

    /// Bound on waiting for the first connection
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.channel.connect_timeout_seconds)
    }
}

/// Parse and validate a backend URL
pub fn parse_backend_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("Invalid backend URL: {}", raw))?;

    match url.scheme() {
        "http" | "https" | "ws" | "wss" => Ok(url),
        other => anyhow::bail!("Unsupported backend URL scheme '{}': {}", other, raw),
    }
}

/// Find config file by searching current directory and parents, then home
fn find_config_file() -> Option<PathBuf> {
    if let Ok(mut current) = std::env::current_dir() {
        loop {
            let config_path = current.join(".cypher").join("config.yaml");
            if config_path.exists() {
                return Some(config_path);
            }

            if !current.pop() {
                break;
            }
        }
    }

    let user_config = dirs::home_dir()?.join(".cypher").join("config.yaml");
    user_config.exists().then_some(user_config)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Merge an environment value and an optional config file over defaults
fn resolve(env_url: Option<String>, file: Option<(PathBuf, ConfigFile)>) -> Result<ResolvedConfig> {
    let (config_file, parsed) = match file {
        Some((path, parsed)) => (Some(path), Some(parsed)),
        None => (None, None),
    };

    let file_url = parsed.as_ref().and_then(|c| c.backend.url.clone());
    let raw_url = env_url
        .filter(|u| !u.trim().is_empty())
        .or(file_url)
        .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
    let backend_url = parse_backend_url(&raw_url)?;

    let defaults = ChannelTuning::default();
    let channel = match parsed.map(|c| c.channel) {
        Some(c) => ChannelTuning {
            reconnect_initial_ms: c
                .reconnect_initial_ms
                .unwrap_or(defaults.reconnect_initial_ms),
            reconnect_max_ms: c.reconnect_max_ms.unwrap_or(defaults.reconnect_max_ms),
            connect_timeout_seconds: c
                .connect_timeout_seconds
                .unwrap_or(defaults.connect_timeout_seconds),
        },
        None => defaults,
    };

    Ok(ResolvedConfig {
        backend_url,
        config_file,
        channel,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let file = match find_config_file() {
        Some(path) => {
            let parsed = load_config_file(&path)?;
            Some((path, parsed))
        }
        None => None,
    };

    resolve(std::env::var(BACKEND_URL_ENV).ok(), file)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(contents: &str) -> (TempDir, PathBuf) {
        let temp = TempDir::new().unwrap();
        let cypher_dir = temp.path().join(".cypher");
        std::fs::create_dir_all(&cypher_dir).unwrap();

        let config_path = cypher_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", contents).unwrap();
        (temp, config_path)
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        let config = resolve(None, None).unwrap();
        assert_eq!(config.backend_url.as_str(), "http://localhost:8000/");
        assert!(config.config_file.is_none());
        assert_eq!(config.channel, ChannelTuning::default());
    }

    #[test]
    fn test_config_file_parsing() {
        let (_temp, path) = write_config(
            r#"
version: "1"
backend:
  url: https://soc.internal:9443
channel:
  reconnect_max_ms: 5000
"#,
        );

        let parsed = load_config_file(&path).unwrap();
        assert_eq!(parsed.version, "1");
        assert_eq!(
            parsed.backend.url.as_deref(),
            Some("https://soc.internal:9443")
        );

        let config = resolve(None, Some((path.clone(), parsed))).unwrap();
        assert_eq!(config.backend_url.as_str(), "https://soc.internal:9443/");
        assert_eq!(config.channel.reconnect_max_ms, 5000);
        assert_eq!(config.channel.reconnect_initial_ms, 1000);
        assert_eq!(config.config_file, Some(path));
    }

    #[test]
    fn test_env_overrides_file() {
        let (_temp, path) = write_config(
            r#"
version: "1"
backend:
  url: http://from-file:8000
"#,
        );
        let parsed = load_config_file(&path).unwrap();

        let config = resolve(Some("http://from-env:8000".to_string()), Some((path, parsed))).unwrap();
        assert_eq!(config.backend_url.host_str(), Some("from-env"));
    }

    #[test]
    fn test_blank_env_is_ignored() {
        let config = resolve(Some("   ".to_string()), None).unwrap();
        assert_eq!(config.backend_url.host_str(), Some("localhost"));
    }

    #[test]
    fn test_flag_overrides_everything() {
        let config = resolve(Some("http://from-env:8000".to_string()), None)
            .unwrap()
            .with_backend("ws://flag:1234")
            .unwrap();
        assert_eq!(config.backend_url.as_str(), "ws://flag:1234/");
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(parse_backend_url("not a url").is_err());
        assert!(parse_backend_url("ftp://localhost").is_err());
        assert!(resolve(Some("mailto:soc@example.com".to_string()), None).is_err());
    }

    #[test]
    fn test_channel_settings_from_config() {
        let mut config = resolve(None, None).unwrap();
        config.channel.reconnect_initial_ms = 250;
        config.channel.connect_timeout_seconds = 3;

        let settings = config.channel_settings();
        assert_eq!(settings.reconnect_initial, Duration::from_millis(250));
        assert_eq!(settings.handshake_timeout, Duration::from_secs(3));
        assert_eq!(settings.endpoint, config.backend_url);
    }

    #[test]
    fn test_malformed_config_file_reports_path() {
        let (_temp, path) = write_config("version: [unclosed");
        let err = load_config_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("config.yaml"));
    }
}
