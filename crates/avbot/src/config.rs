//! Application configuration: an optional TOML file overlaid by environment
//! variables (`MATRIX__ACCESS_TOKEN`, `SERVER__PORT`, ...).

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "AVBOT_CONFIG";

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server for webhooks and the admin API
    #[serde(default)]
    pub server: ServerConfig,

    /// Matrix account the bot runs as
    pub matrix: MatrixConfig,

    /// Service configuration storage
    #[serde(default)]
    pub store: StoreConfig,

    /// Bot behavior and logging
    #[serde(default)]
    pub bot: BotConfig,

    /// Services configured at startup
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Public URL webhook endpoints are derived from
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatrixConfig {
    pub homeserver_url: String,

    pub user_id: String,

    pub access_token: SecretString,

    /// Long-poll timeout for /sync
    #[serde(default = "default_sync_timeout", with = "humantime_serde")]
    pub sync_timeout: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,

    /// Directory for the file store
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Prefix that marks a message as a command
    #[serde(default = "default_trigger")]
    pub trigger: String,

    /// Join rooms the bot is invited to
    #[serde(default = "default_true")]
    pub auto_join: bool,

    /// Timeout for calls to third-party services
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub http_timeout: Duration,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,
}

/// A service to configure at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEntry {
    #[serde(rename = "type")]
    pub service_type: String,

    pub id: String,

    /// Defaults to the bot's own account
    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default = "default_service_config")]
    pub config: serde_json::Value,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
            base_url: default_base_url(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            path: default_store_path(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            trigger: default_trigger(),
            auto_join: default_true(),
            http_timeout: default_http_timeout(),
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    4050
}

fn default_base_url() -> String {
    "http://localhost:4050".into()
}

fn default_sync_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/services")
}

fn default_trigger() -> String {
    crate::router::DEFAULT_TRIGGER.into()
}

fn default_true() -> bool {
    true
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_log_level() -> String {
    "info".into()
}

fn default_service_config() -> serde_json::Value {
    serde_json::json!({})
}

impl Config {
    /// Load configuration from the config file (if present) and environment.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".into());
        Self::from_sources(
            config::File::with_name(&path).required(false),
            config::Environment::default()
                .separator("__")
                .try_parsing(false),
        )
    }

    fn from_sources<F, E>(file: F, env: E) -> Result<Self>
    where
        F: config::Source + Send + Sync + 'static,
        E: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder()
            .add_source(file)
            .add_source(env)
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Bind address for the HTTP server. An unparsable address falls back
    /// to loopback since the admin API is unauthenticated.
    pub fn listen_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(
            self.server
                .listen_addr
                .parse()
                .unwrap_or([127, 0, 0, 1].into()),
            self.server.port,
        )
    }
}
