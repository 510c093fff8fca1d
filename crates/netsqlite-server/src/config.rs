//! Server configuration loading from file and environment variables.

use netsqlite_db::DbRuntimeSettings;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Listener settings for both transports.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Token allow-list.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Graceful shutdown settings.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind both listeners to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port of the RPC (HTTP) listener.
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    /// Port of the raw TCP protocol listener.
    #[serde(default = "default_raw_port")]
    pub raw_port: u16,

    /// Whether to start the raw protocol listener at all.
    #[serde(default = "default_true")]
    pub raw_enabled: bool,
}

impl ServerConfig {
    pub fn rpc_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.rpc_port)
    }

    pub fn raw_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.raw_port)
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding one SQLite file per logical database.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Maximum pooled connections per database.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// SQLite busy timeout, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum wait for a free pooled connection, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
            acquire_timeout_ms: self.acquire_timeout_ms,
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Accepted bearer tokens.
    #[serde(default)]
    pub tokens: Vec<String>,
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownConfig {
    /// How long in-flight work may run after a shutdown signal.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "netsqlite_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_rpc_port() -> u16 {
    3541
}

fn default_raw_port() -> u16 {
    3542
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_pool_max_size() -> u32 {
    5
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_grace_period_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            rpc_port: default_rpc_port(),
            raw_port: default_raw_port(),
            raw_enabled: true,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            pool_max_size: default_pool_max_size(),
            busy_timeout_ms: default_timeout_ms(),
            acquire_timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `NETSQLITE_HOST` overrides `server.host`
/// - `NETSQLITE_RPC_PORT` overrides `server.rpc_port`
/// - `NETSQLITE_RAW_PORT` overrides `server.raw_port`
/// - `NETSQLITE_DATA_DIR` overrides `database.data_dir`
/// - `NETSQLITE_TOKENS` replaces `auth.tokens` (comma-separated)
/// - `NETSQLITE_LOG_LEVEL` overrides `logging.level`
/// - `NETSQLITE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    Ok(apply_env_overrides(config, |key| std::env::var(key).ok()))
}

/// Applies `NETSQLITE_*` overrides read through `lookup`.
///
/// Unparseable values are ignored and the file/default value is kept.
pub fn apply_env_overrides(mut config: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(host) = lookup("NETSQLITE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("NETSQLITE_RPC_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.rpc_port = parsed;
        }
    }
    if let Some(port) = lookup("NETSQLITE_RAW_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.raw_port = parsed;
        }
    }
    if let Some(data_dir) = lookup("NETSQLITE_DATA_DIR") {
        config.database.data_dir = data_dir;
    }
    if let Some(tokens) = lookup("NETSQLITE_TOKENS") {
        config.auth.tokens = tokens
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(level) = lookup("NETSQLITE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("NETSQLITE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.rpc_port, 3541);
        assert_eq!(config.server.raw_port, 3542);
        assert!(config.server.raw_enabled);
        assert_eq!(config.database.data_dir, "data");
        assert_eq!(config.database.pool_max_size, 5);
        assert_eq!(config.shutdown.grace_period_secs, 10);
        assert!(config.auth.tokens.is_empty());
    }

    #[test]
    fn partial_sections_keep_field_defaults() {
        let config: Config = toml::from_str(
            r#"
            [database]
            pool_max_size = 2

            [auth]
            tokens = ["alpha", "beta"]
            "#,
        )
        .unwrap();
        assert_eq!(config.database.pool_max_size, 2);
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.auth.tokens, vec!["alpha", "beta"]);
        assert_eq!(config.database.runtime_settings().pool_max_size, 2);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.server.rpc_port, 3541);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nrpc_port = ").unwrap();
        assert!(matches!(
            load_config(path.to_str()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("NETSQLITE_RPC_PORT", "9000"),
            ("NETSQLITE_RAW_PORT", "not-a-port"),
            ("NETSQLITE_TOKENS", "t1, t2,,"),
            ("NETSQLITE_LOG_JSON", "1"),
            ("NETSQLITE_DATA_DIR", "/srv/db"),
        ]
        .into_iter()
        .collect();

        let config = apply_env_overrides(Config::default(), |k| {
            env.get(k).map(|v| v.to_string())
        });
        assert_eq!(config.server.rpc_port, 9000);
        assert_eq!(config.server.raw_port, 3542);
        assert_eq!(config.auth.tokens, vec!["t1", "t2"]);
        assert!(config.logging.json);
        assert_eq!(config.database.data_dir, "/srv/db");
    }
}
