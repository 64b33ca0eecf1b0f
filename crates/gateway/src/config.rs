//! Configuration management for the gateway.
//!
//! This module handles loading, validation, and conversion of the gateway
//! configuration from TOML files and command-line arguments.

use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use tracing::info;
use world_gateway::config::{ConnectionLimits, ServerConfig, UpstreamConfig};
use world_gateway::upstream::channel::validate_target;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listener settings
    #[serde(default)]
    pub server: ServerSettings,
    /// Simulation service settings
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Per-connection limits and deadlines
    #[serde(default)]
    pub connections: ConnectionLimits,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to accept subscribers on, `host:port`
    pub bind_address: String,
    /// Path upgraded to the object stream
    pub stream_path: String,
    /// Path answered with `204 No Content`
    pub health_path: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            stream_path: "/object-stream".to_string(),
            health_path: "/health".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from `path`, writing a default file first if none
    /// exists.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the application configuration into the server's configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        Ok(ServerConfig {
            bind_address: resolve_bind_address(&self.server.bind_address)?,
            stream_path: self.server.stream_path.clone(),
            health_path: self.server.health_path.clone(),
            connection: self.connections.clone(),
            upstream: self.upstream.clone(),
        })
    }

    /// Validates the configuration, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if resolve_bind_address(&self.server.bind_address).is_err() {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }

        if validate_target(&self.upstream.target_address).is_err() {
            return Err(format!(
                "Invalid upstream target: {}. Expected host:port",
                &self.upstream.target_address
            ));
        }

        for (name, path) in [
            ("stream_path", &self.server.stream_path),
            ("health_path", &self.server.health_path),
        ] {
            if !path.starts_with('/') {
                return Err(format!("server.{name} must start with '/': {path}"));
            }
        }
        if self.server.stream_path == self.server.health_path {
            return Err("server.stream_path and server.health_path must differ".to_string());
        }

        let limits = &self.connections;
        for (name, value) in [
            ("max_subscriptions", limits.max_subscriptions as u64),
            ("delivery_queue_capacity", limits.delivery_queue_capacity as u64),
            ("bootstrap_queue_capacity", limits.bootstrap_queue_capacity as u64),
            ("max_message_size", limits.max_message_size as u64),
            ("read_timeout_secs", limits.read_timeout_secs),
            ("write_timeout_secs", limits.write_timeout_secs),
            ("ping_interval_secs", limits.ping_interval_secs),
        ] {
            if value == 0 {
                return Err(format!("connections.{name} must be greater than 0"));
            }
        }
        if limits.ping_interval_secs >= limits.read_timeout_secs {
            return Err(format!(
                "connections.ping_interval_secs ({}) must be shorter than read_timeout_secs ({})",
                limits.ping_interval_secs, limits.read_timeout_secs
            ));
        }

        let upstream = &self.upstream;
        if upstream.initial_backoff_ms == 0 || upstream.max_backoff_ms < upstream.initial_backoff_ms {
            return Err("upstream backoff must satisfy 0 < initial_backoff_ms <= max_backoff_ms".to_string());
        }
        for (name, value) in [
            ("base_delay_ms", upstream.dial.base_delay_ms),
            ("max_delay_ms", upstream.dial.max_delay_ms),
            ("min_connect_timeout_ms", upstream.dial.min_connect_timeout_ms),
        ] {
            if value == 0 {
                return Err(format!("upstream.dial.{name} must be greater than 0"));
            }
        }
        if upstream.dial.max_delay_ms < upstream.dial.base_delay_ms {
            return Err("upstream.dial needs base_delay_ms <= max_delay_ms".to_string());
        }
        if upstream.dial.multiplier < 1.0 || !(0.0..=1.0).contains(&upstream.dial.jitter) {
            return Err("upstream.dial needs multiplier >= 1.0 and jitter within 0.0..=1.0".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

/// Parses `host:port`, resolving host names such as `localhost`.
fn resolve_bind_address(address: &str) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Ok(addr);
    }
    address
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| format!("{address} did not resolve to any address").into())
}
