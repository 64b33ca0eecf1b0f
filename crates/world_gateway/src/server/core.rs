//! Core gateway server implementation.
//!
//! Startup runs in a fixed order: the hub is spawned, the upstream reader
//! starts feeding it, the terrain of every room is fetched, and only then is
//! the listener bound and connections accepted. Updates that arrive while the
//! terrain is loading are already applied by the hub.

use super::handlers::{handle_connection, ConnectionContext};
use crate::config::ServerConfig;
use crate::error::{ServerError, UpstreamError};
use crate::hub::{Hub, HubHandle, RegionTables};
use crate::shutdown::ShutdownState;
use crate::upstream::{init_terrain, listen_to_world, ReconnectBackoff, WorldSource};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The gateway: hub, upstream reader, terrain bootstrap and accept loop.
pub struct GatewayServer {
    /// Server configuration settings
    config: ServerConfig,

    /// The simulation the gateway republishes
    source: Arc<dyn WorldSource>,

    /// The hub, until it is spawned by `run`/`serve`
    hub: Option<Hub>,

    /// Entry point to the hub, shared with every connection
    hub_handle: HubHandle,
}

impl GatewayServer {
    pub fn new(config: ServerConfig, source: Arc<dyn WorldSource>) -> Self {
        let (hub, hub_handle) = Hub::new(Arc::new(RegionTables::new()));
        Self {
            config,
            source,
            hub: Some(hub),
            hub_handle,
        }
    }

    /// A handle to the hub, e.g. for periodic statistics.
    pub fn hub_handle(&self) -> HubHandle {
        self.hub_handle.clone()
    }

    pub fn tables(&self) -> Arc<RegionTables> {
        self.hub_handle.tables().clone()
    }

    /// Starts the pipeline, binds the configured address and serves until
    /// shutdown.
    pub async fn run(mut self, shutdown: ShutdownState) -> Result<(), ServerError> {
        let reader = self.start_pipeline().await?;

        let listener = match TcpListener::bind(self.config.bind_address).await {
            Ok(listener) => listener,
            Err(e) => {
                reader.abort();
                return Err(ServerError::Network(format!(
                    "failed to bind {}: {e}",
                    self.config.bind_address
                )));
            }
        };
        self.accept_loop(listener, reader, shutdown).await
    }

    /// Like [`run`](Self::run) but on an already bound listener.
    pub async fn serve(mut self, listener: TcpListener, shutdown: ShutdownState) -> Result<(), ServerError> {
        let reader = self.start_pipeline().await?;
        self.accept_loop(listener, reader, shutdown).await
    }

    /// Spawns the hub and the upstream reader, then loads all terrain.
    async fn start_pipeline(&mut self) -> Result<JoinHandle<Result<(), UpstreamError>>, ServerError> {
        let hub = self
            .hub
            .take()
            .ok_or_else(|| ServerError::Internal("server already started".to_string()))?;
        tokio::spawn(hub.run());

        let resubscribe_backoff =
            ReconnectBackoff::new(self.config.upstream.initial_backoff(), self.config.upstream.max_backoff());
        let reader = tokio::spawn(listen_to_world(
            self.source.clone(),
            self.hub_handle.clone(),
            resubscribe_backoff,
        ));

        info!("🗺️ Loading room terrain");
        if let Err(e) = init_terrain(self.source.clone(), self.hub_handle.tables()).await {
            error!("Failed to load terrain: {e}");
            reader.abort();
            return Err(ServerError::Startup(e.to_string()));
        }
        Ok(reader)
    }

    async fn accept_loop(
        self,
        listener: TcpListener,
        mut reader: JoinHandle<Result<(), UpstreamError>>,
        shutdown: ShutdownState,
    ) -> Result<(), ServerError> {
        let ctx = ConnectionContext {
            hub: self.hub_handle.clone(),
            limits: self.config.connection.clone(),
            stream_path: self.config.stream_path.clone(),
            health_path: self.config.health_path.clone(),
        };
        match listener.local_addr() {
            Ok(addr) => info!("🚀 Init done. Listening on {addr}"),
            Err(_) => info!("🚀 Init done. Listening"),
        }

        let result = loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("🛑 Accept loop stopping - shutdown initiated");
                    break Ok(());
                }
                finished = &mut reader => {
                    break match finished {
                        Ok(Ok(())) => {
                            warn!("Upstream entity feed ended, stopping the gateway");
                            Err(ServerError::Internal("upstream entity feed ended".to_string()))
                        }
                        Ok(Err(e)) => Err(ServerError::Upstream(e)),
                        Err(e) => Err(ServerError::Internal(format!("upstream reader failed: {e}"))),
                    };
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "Accepted socket");
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, ctx).await {
                                debug!(%addr, "Connection error: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {e}");
                        break Err(ServerError::Network(format!("accept failed: {e}")));
                    }
                },
            }
        };

        reader.abort();
        info!("Server stopped");
        result
    }
}
