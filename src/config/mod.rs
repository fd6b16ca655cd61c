//! Typed configuration for the broker, the network transport and logging.
//!
//! Every field has a default, so an empty file (or no file at all) is a
//! valid configuration. `from_env` loads the TOML file named by
//! `COURTIER_CONFIG` when set and then applies environment overrides.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::net::protocol::{DEFAULT_TOKEN_WIDTH, MIN_TOKEN_WIDTH};

const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub client: ClientConfig,
    pub server: ServerConfig,
    pub log_level: String,
    pub otel_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            client: ClientConfig::default(),
            server: ServerConfig::default(),
            log_level: "info".to_string(),
            otel_endpoint: None,
        }
    }
}

/// Sizing of channels and the local worker pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Capacity of each raw and each processed queue.
    pub queue_capacity: usize,
    /// Channel ids wrap back to 0 when they reach this value.
    pub max_channel_id: u64,
    /// In-process consumers started by `serve`.
    pub local_workers: usize,
    /// How long a local consumer waits on one channel before trying the next.
    pub consumer_poll_ms: u64,
}

impl BrokerConfig {
    pub fn consumer_poll(&self) -> Duration {
        Duration::from_millis(self.consumer_poll_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            max_channel_id: 1 << 48,
            local_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            consumer_poll_ms: 500,
        }
    }
}

/// Remote worker side of the transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port` of the broker's network consumer.
    pub endpoint: String,
    /// 0 retries forever.
    pub max_connection_attempts: u32,
    /// Consecutive "no work" replies tolerated. 0 tolerates any number.
    pub max_stalls: u32,
    pub retry_interval_ms: u64,
    pub token_width: usize,
    pub max_payload_bytes: usize,
}

impl ClientConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:10000".to_string(),
            max_connection_attempts: 10,
            max_stalls: 10,
            retry_interval_ms: 1000,
            token_width: DEFAULT_TOKEN_WIDTH,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

/// Broker side of the transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub token_width: usize,
    /// How long a "ready" request may wait for work before the reply is "timeout".
    pub work_wait_ms: u64,
    pub max_payload_bytes: usize,
}

impl ServerConfig {
    pub fn work_wait(&self) -> Duration {
        Duration::from_millis(self.work_wait_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:10000".to_string(),
            token_width: DEFAULT_TOKEN_WIDTH,
            work_wait_ms: 1000,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from `COURTIER_CONFIG` (if set) and apply `LOG_LEVEL` and
    /// `OTEL_ENDPOINT` overrides.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("COURTIER_CONFIG") {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }
        if let Ok(endpoint) = std::env::var("OTEL_ENDPOINT") {
            config.otel_endpoint = Some(endpoint);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker.queue_capacity == 0 {
            return Err(Error::Config("broker.queue_capacity must be > 0".to_string()));
        }
        if self.broker.max_channel_id == 0 {
            return Err(Error::Config("broker.max_channel_id must be > 0".to_string()));
        }
        for (section, width) in [
            ("client", self.client.token_width),
            ("server", self.server.token_width),
        ] {
            if width < MIN_TOKEN_WIDTH {
                return Err(Error::Config(format!(
                    "{section}.token_width must be at least {MIN_TOKEN_WIDTH}, got {width}"
                )));
            }
        }
        Ok(())
    }
}
