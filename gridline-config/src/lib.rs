//! Layered configuration loading utilities.

use std::path::{Path, PathBuf};

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root application configuration deserialized from layered sources.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
}

/// Connection parameters for the broker gateway.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    /// Client id presented to the gateway; also packed into every
    /// order reference so ownership survives restarts.
    #[serde(default = "default_client_id")]
    pub client_id: i32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Pause between reconnection attempts while the link is down.
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,
    /// Outages longer than this trigger a full order recovery.
    #[serde(default = "default_max_connection_loss_secs")]
    pub max_connection_loss_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Pause between reconciliation cycles.
    #[serde(default = "default_cycle_secs")]
    pub cycle_secs: u64,
    /// Upper bound on waiting for a cancellation to leave the book.
    #[serde(default = "default_cancel_wait_secs")]
    pub cancel_wait_secs: u64,
    #[serde(default = "default_heartbeat_path")]
    pub heartbeat_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_strategies_file")]
    pub strategies_file: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AlertingConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            client_id: default_client_id(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_secs: default_reconnect_secs(),
            max_connection_loss_secs: default_max_connection_loss_secs(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_secs: default_cycle_secs(),
            cancel_wait_secs: default_cancel_wait_secs(),
            heartbeat_path: default_heartbeat_path(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            strategies_file: default_strategies_file(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_broker_host() -> String {
    "127.0.0.1".to_string()
}

fn default_broker_port() -> u16 {
    7497
}

fn default_client_id() -> i32 {
    19
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_reconnect_secs() -> u64 {
    100
}

fn default_max_connection_loss_secs() -> u64 {
    15
}

fn default_cycle_secs() -> u64 {
    5
}

fn default_cancel_wait_secs() -> u64 {
    10
}

fn default_heartbeat_path() -> PathBuf {
    PathBuf::from("./heartbeat.txt")
}

fn default_strategies_file() -> PathBuf {
    PathBuf::from("./strategies.csv")
}

/// Loads configuration by merging files and environment variables.
///
/// Sources (lowest to highest precedence):
/// 1. `config/default.toml`
/// 2. `config/{environment}.toml` (if `environment` is Some)
/// 3. `config/local.toml` (optional, ignored in git)
/// 4. Environment variables prefixed with `GRIDLINE_`
pub fn load_config(env: Option<&str>) -> Result<AppConfig> {
    let base_path = Path::new("config");

    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(true));
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::from(base_path.join(format!("{env_name}.toml"))).required(false));
    }

    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));

    builder = builder.add_source(
        Environment::with_prefix("GRIDLINE")
            .separator("__")
            .ignore_empty(true),
    );

    let config = builder.build()?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}
