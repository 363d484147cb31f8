//! Configuration module for the market data relay

use serde::Deserialize;
use std::net::SocketAddr;

use crate::error::{RelayError, Result};

/// Environment variable prefix (`RELAY_PORT`, `RELAY_WS_PATH`, ...)
const ENV_PREFIX: &str = "RELAY";

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interface to bind the gateway on
    pub host: String,

    /// Port shared by the relay endpoint, health check and metrics
    pub port: u16,

    /// WebSocket path accepting both the producer and subscribers
    pub ws_path: String,

    /// Outbound queue capacity per connection; a full queue evicts the subscriber
    pub subscriber_queue: usize,

    /// Relay messages of unrecognized shape to subscribers verbatim
    pub relay_opaque: bool,

    /// Keepalive ping interval in seconds
    pub ping_interval_secs: u64,
}

impl Config {
    /// Load configuration from `.env` and `RELAY_*` environment variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
    }

    /// Load configuration from an arbitrary `config` source layered over defaults
    pub fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config: Self = config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the gateway cannot run with
    pub fn validate(&self) -> Result<()> {
        if !self.ws_path.starts_with('/') {
            return Err(RelayError::Config(format!(
                "ws_path must start with '/': {:?}",
                self.ws_path
            )));
        }
        if self.ws_path == "/health" || self.ws_path == "/metrics" {
            return Err(RelayError::Config(format!(
                "ws_path {} collides with a built-in route",
                self.ws_path
            )));
        }
        if self.subscriber_queue == 0 {
            return Err(RelayError::Config(
                "subscriber_queue must be greater than zero".to_string(),
            ));
        }
        if self.ping_interval_secs == 0 {
            return Err(RelayError::Config(
                "ping_interval_secs must be greater than zero".to_string(),
            ));
        }
        self.bind_addr().map(|_| ())
    }

    /// Socket address the listener binds to
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid bind address: {}", e)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            ws_path: "/ws".to_string(),
            subscriber_queue: 1024,
            relay_opaque: true,
            ping_interval_secs: 30,
        }
    }
}
