//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (HERALD_HOST, HERALD_PORT)
//! - TOML configuration file
//! - Command line arguments (`--config`)

use anyhow::{Context, Result};
use herald_core::ChannelRules;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Verbose logging of joins, leaves, ingested events and dropped input.
    #[serde(default)]
    pub dev_mode: bool,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Channel authorization endpoint.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Membership store.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Enabled ingestion sources.
    #[serde(default)]
    pub subscribers: SubscribersConfig,

    /// Applications allowed to use the HTTP API.
    #[serde(default)]
    pub clients: Vec<ClientConfig>,

    /// CORS headers for the HTTP API.
    #[serde(default)]
    pub api_origin_allow: CorsConfig,

    /// Relay between instances.
    #[serde(default)]
    pub adapter: AdapterConfig,

    /// Channel and client event patterns.
    #[serde(default)]
    pub channels: ChannelRules,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Where private and presence subscriptions are authorized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the authorization host.
    #[serde(default = "default_auth_host")]
    pub host: String,

    /// Path of the authorization endpoint.
    #[serde(default = "default_auth_endpoint")]
    pub endpoint: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_auth_timeout")]
    pub timeout_ms: u64,
}

/// Membership store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Store driver: `memory`, `sqlite` or `redis`.
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Redis connection, shared with the Redis subscriber.
    #[serde(default)]
    pub redis: RedisConfig,

    /// SQLite database.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix of stored keys and of subscribed channels.
    #[serde(default)]
    pub key_prefix: String,

    /// Publish `PresenceChannelUpdated` whenever a member list is written.
    #[serde(default)]
    pub publish_presence: bool,
}

/// SQLite settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file, created if missing.
    #[serde(default = "default_sqlite_path")]
    pub path: String,
}

/// Ingestion sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribersConfig {
    /// Accept events on `POST /apps/:appId/events`.
    #[serde(default = "default_true")]
    pub http: bool,

    /// Pattern-subscribe to the Redis key prefix.
    #[serde(default)]
    pub redis: bool,
}

/// An application allowed to call the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Application id, matched against the `:appId` path segment.
    pub app_id: String,

    /// Secret key.
    pub key: String,
}

/// CORS headers added to HTTP responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Add the headers at all.
    #[serde(default)]
    pub allow_cors: bool,

    /// `Access-Control-Allow-Origin`.
    #[serde(default)]
    pub allow_origin: String,

    /// `Access-Control-Allow-Methods`, comma separated.
    #[serde(default)]
    pub allow_methods: String,

    /// `Access-Control-Allow-Headers`, comma separated.
    #[serde(default)]
    pub allow_headers: String,
}

/// Relay between instances sharing sockets and rooms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Enable the Redis relay.
    #[serde(default)]
    pub enabled: bool,

    /// Redis URL of the relay.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Prefix of the relay's pub/sub channels.
    #[serde(default = "default_adapter_prefix")]
    pub key_prefix: String,

    /// How long to wait for other instances to answer, in milliseconds.
    #[serde(default = "default_adapter_timeout")]
    pub request_timeout_ms: u64,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("HERALD_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("HERALD_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(6001)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_auth_host() -> String {
    "http://localhost".to_string()
}

fn default_auth_endpoint() -> String {
    "/broadcasting/auth".to_string()
}

fn default_auth_timeout() -> u64 {
    10_000
}

fn default_driver() -> String {
    "memory".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_sqlite_path() -> String {
    "database/herald.sqlite".to_string()
}

fn default_adapter_prefix() -> String {
    "herald".to_string()
}

fn default_adapter_timeout() -> u64 {
    5_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_heartbeat_interval() -> u64 {
    25_000
}

fn default_heartbeat_timeout() -> u64 {
    60_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
            transport: TransportConfig::default(),
            auth: AuthConfig::default(),
            database: DatabaseConfig::default(),
            subscribers: SubscribersConfig::default(),
            clients: Vec::new(),
            api_origin_allow: CorsConfig::default(),
            adapter: AdapterConfig::default(),
            channels: ChannelRules::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            host: default_auth_host(),
            endpoint: default_auth_endpoint(),
            timeout_ms: default_auth_timeout(),
        }
    }
}

impl AuthConfig {
    /// Full URL of the authorization endpoint.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}{}", self.host.trim_end_matches('/'), self.endpoint)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            redis: RedisConfig::default(),
            sqlite: SqliteConfig::default(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: String::new(),
            publish_presence: false,
        }
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
        }
    }
}

impl Default for SubscribersConfig {
    fn default() -> Self {
        Self {
            http: true,
            redis: false,
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            key_prefix: default_adapter_prefix(),
            request_timeout_ms: default_adapter_timeout(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit file, or from the first default
    /// path that exists, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let config_paths = [
            "herald.toml",
            "/etc/herald/herald.toml",
            "~/.config/herald/herald.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Key configured for an application, if any.
    #[must_use]
    pub fn client_key(&self, app_id: &str) -> Option<&str> {
        self.clients
            .iter()
            .find(|client| client.app_id == app_id)
            .map(|client| client.key.as_str())
    }
}
