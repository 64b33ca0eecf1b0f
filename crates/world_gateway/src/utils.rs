//! Factory helpers for building a gateway against a real simulation.

use crate::config::{ServerConfig, UpstreamConfig};
use crate::error::UpstreamError;
use crate::server::GatewayServer;
use crate::upstream::{wait_for_connection_ready, ReconnectBackoff, UpstreamChannel, WsWorldClient};
use std::sync::Arc;
use tracing::info;

/// Dials the configured simulation until it is reachable and returns a client
/// for it.
///
/// Blocks (asynchronously) for as long as the simulation is down. Fails only
/// when the target address is malformed.
pub async fn connect_upstream(config: &UpstreamConfig) -> Result<WsWorldClient, UpstreamError> {
    info!(upstream = %config.target_address, "Waiting for the simulation service");
    let backoff = ReconnectBackoff::new(config.initial_backoff(), config.max_backoff());
    let channel = wait_for_connection_ready(
        || UpstreamChannel::dial(&config.target_address, config.dial.clone()),
        backoff,
    )
    .await?;
    info!(upstream = %config.target_address, "Simulation service ready");
    Ok(WsWorldClient::new(channel))
}

/// Connects to the simulation named in `config` and builds the server on top
/// of it.
pub async fn create_gateway(config: ServerConfig) -> Result<GatewayServer, UpstreamError> {
    let client = connect_upstream(&config.upstream).await?;
    Ok(GatewayServer::new(config, Arc::new(client)))
}
