//! Server configuration types and defaults.
//!
//! This module contains the configuration structures used to initialize the
//! gateway: listen address and routes, per-connection limits and the
//! upstream dial parameters.

use crate::upstream::DialPolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration structure for the gateway server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The socket address to accept subscriber connections on
    pub bind_address: SocketAddr,

    /// Request path that is upgraded to the object stream
    pub stream_path: String,

    /// Request path answered with `204 No Content`
    pub health_path: String,

    /// Per-connection limits and deadlines
    pub connection: ConnectionLimits,

    /// Upstream simulation connection settings
    pub upstream: UpstreamConfig,
}

/// Limits and deadlines applied to every subscriber connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionLimits {
    /// Maximum number of entries in a connection's subscription set
    pub max_subscriptions: usize,

    /// Capacity of the hub-to-connection delivery queue; a full queue evicts the connection
    pub delivery_queue_capacity: usize,

    /// Capacity of the inbound-to-outbound bootstrap request queue
    pub bootstrap_queue_capacity: usize,

    /// Maximum size of a single inbound message in bytes
    pub max_message_size: usize,

    /// Read inactivity deadline in seconds, refreshed on every pong
    pub read_timeout_secs: u64,

    /// Deadline for a single outbound write in seconds
    pub write_timeout_secs: u64,

    /// Interval between keepalive pings in seconds
    pub ping_interval_secs: u64,
}

/// Upstream simulation endpoint and initial-dial backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// `host:port` of the simulation service
    pub target_address: String,

    /// First delay of the readiness loop backoff
    pub initial_backoff_ms: u64,

    /// Upper bound of the readiness loop backoff
    pub max_backoff_ms: u64,

    /// Parameters of the lower-level connector
    pub dial: DialPolicy,
}

impl ConnectionLimits {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

impl UpstreamConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            stream_path: "/object-stream".to_string(),
            health_path: "/health".to_string(),
            connection: ConnectionLimits::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_subscriptions: 100,
            delivery_queue_capacity: 100,
            bootstrap_queue_capacity: 100,
            max_message_size: 10 * 1024,
            read_timeout_secs: 60,
            write_timeout_secs: 10,
            ping_interval_secs: 50,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            target_address: "localhost:50051".to_string(),
            initial_backoff_ms: 500,
            max_backoff_ms: 5000,
            dial: DialPolicy::default(),
        }
    }
}
