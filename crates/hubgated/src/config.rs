//! Configuration file parsing and structures.
//!
//! hubgated uses TOML for declarative configuration: one section per
//! collaborator (hub, gateway, HTTP API) plus file locations and logging.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    pub hub: HubConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,
}

/// Home-automation hub connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Base URL of the hub (e.g. "http://homeassistant.local:8123")
    pub url: String,

    /// Long-lived access token
    pub token: String,

    /// Suppression window for identical repeated service calls
    #[serde(default = "default_command_cooldown")]
    pub command_cooldown_secs: u64,
}

fn default_command_cooldown() -> u64 {
    3
}

impl HubConfig {
    /// REST API base URL.
    pub fn api_url(&self) -> String {
        format!("{}/api", self.url.trim_end_matches('/'))
    }

    /// WebSocket event API URL.
    pub fn websocket_url(&self) -> String {
        let url = self.url.trim_end_matches('/');
        url.replace("https://", "wss://")
            .replace("http://", "ws://")
            + "/api/websocket"
    }
}

/// Voice-assistant gateway connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub broker: String,

    #[serde(default = "default_gateway_port")]
    pub port: u16,

    pub username: String,
    pub password: String,

    /// HTTP API endpoint used to fetch the category catalog. The gateway can
    /// update this at runtime over its broadcast config topic.
    pub endpoint: String,

    /// Root of the gateway's topic tree; the session appends the username.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    #[serde(default = "default_true")]
    pub tls: bool,

    /// Optional PEM bundle to trust instead of an empty chain.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Interval of the idle full-status push.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

fn default_gateway_port() -> u16 {
    8883
}

fn default_topic_prefix() -> String {
    "gateway/v1".to_string()
}

fn default_true() -> bool {
    true
}

fn default_heartbeat() -> u64 {
    300
}

/// HTTP configuration surface settings.
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_api_port(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8099
}

/// Locations of the persisted registry and catalog documents.
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_devices_file")]
    pub devices_file: PathBuf,

    #[serde(default = "default_categories_file")]
    pub categories_file: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            devices_file: default_devices_file(),
            categories_file: default_categories_file(),
        }
    }
}

fn default_devices_file() -> PathBuf {
    PathBuf::from("devices.json")
}

fn default_categories_file() -> PathBuf {
    PathBuf::from("categories.json")
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        toml::from_str(&contents).map_err(ConfigError::Parse)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Runtime store for the gateway's HTTP API endpoint.
///
/// The gateway may push a replacement endpoint over its broadcast config
/// topic. A watch channel keeps this a single-writer value with
/// change-notified readers instead of shared mutable options.
#[derive(Debug)]
pub struct EndpointStore {
    tx: watch::Sender<String>,
}

impl EndpointStore {
    pub fn new(initial: impl Into<String>) -> Self {
        let (tx, _) = watch::channel(initial.into());
        Self { tx }
    }

    pub fn current(&self) -> String {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }

    /// Replace the endpoint if it changed. No-op (and no notification) for
    /// an identical or empty value.
    pub fn set(&self, endpoint: &str) {
        if endpoint.is_empty() {
            return;
        }
        self.tx.send_if_modified(|current| {
            if current == endpoint {
                return false;
            }
            info!("gateway endpoint changed: {} -> {}", current, endpoint);
            *current = endpoint.to_string();
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [hub]
        url = "http://homeassistant.local:8123"
        token = "secret"

        [gateway]
        broker = "mqtt.example.com"
        username = "bridge-1"
        password = "hunter2"
        endpoint = "https://gate.example.com"
    "#;

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str(MINIMAL).unwrap();

        assert_eq!(config.hub.api_url(), "http://homeassistant.local:8123/api");
        assert_eq!(
            config.hub.websocket_url(),
            "ws://homeassistant.local:8123/api/websocket"
        );
        assert_eq!(config.hub.command_cooldown_secs, 3);
        assert_eq!(config.gateway.port, 8883);
        assert!(config.gateway.tls);
        assert_eq!(config.gateway.topic_prefix, "gateway/v1");
        assert_eq!(config.api.port, 8099);
        assert_eq!(config.store.devices_file, PathBuf::from("devices.json"));
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_parse_overrides() {
        let toml = r#"
            [hub]
            url = "https://ha.example.com/"
            token = "secret"
            command_cooldown_secs = 10

            [gateway]
            broker = "mqtt.example.com"
            port = 1883
            username = "bridge-1"
            password = "hunter2"
            endpoint = "https://gate.example.com"
            tls = false
            heartbeat_secs = 60

            [api]
            listen = "127.0.0.1"
            port = 9000

            [logging]
            level = "debug"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.hub.command_cooldown_secs, 10);
        assert_eq!(
            config.hub.websocket_url(),
            "wss://ha.example.com/api/websocket"
        );
        assert!(!config.gateway.tls);
        assert_eq!(config.gateway.heartbeat_secs, 60);
        assert_eq!(config.api.listen, "127.0.0.1");
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_endpoint_store_notifies_on_change() {
        let store = EndpointStore::new("https://gate.example.com");
        let mut rx = store.subscribe();

        store.set("https://gate.example.com");
        assert!(!rx.has_changed().unwrap());

        store.set("https://gate2.example.com");
        assert!(rx.has_changed().unwrap());
        assert_eq!(store.current(), "https://gate2.example.com");
    }

    #[test]
    fn test_endpoint_store_ignores_empty() {
        let store = EndpointStore::new("https://gate.example.com");
        store.set("");
        assert_eq!(store.current(), "https://gate.example.com");
    }
}
