//! Error types and handling for the gateway.
//!
//! Server-level failures are separated from failures of the upstream
//! simulation collaborator so that callers can tell a bad listen socket from
//! an unreachable simulation.

use crate::region::RoomId;

/// Enumeration of possible server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Network-related errors such as binding failures or handshake issues
    #[error("Network error: {0}")]
    Network(String),

    /// Internal errors such as a stopped hub
    #[error("Internal error: {0}")]
    Internal(String),

    /// Startup could not complete; the process must not serve traffic
    #[error("Startup failed: {0}")]
    Startup(String),

    /// The upstream simulation failed in a way the gateway cannot recover from
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),
}

/// Failures talking to the upstream simulation service.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The configured target is not a `host:port` pair. Never retried.
    #[error("invalid upstream target '{0}', expected host:port")]
    InvalidTarget(String),

    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode upstream payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// A request/response call ended without a reply frame
    #[error("upstream closed {0} without replying")]
    NoReply(String),

    #[error("terrain fetch for room {room_id} failed: {source}")]
    Terrain {
        room_id: RoomId,
        source: Box<UpstreamError>,
    },

    #[error("upstream task failed: {0}")]
    TaskFailed(String),
}
