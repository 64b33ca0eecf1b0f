//! Application lifecycle.
//!
//! Waits for the simulation service, serves subscribers, reports hub
//! statistics every minute and shuts down on SIGINT/SIGTERM. A second signal
//! exits immediately.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    signals::{wait_for_shutdown_signal, wait_for_signal},
};
use std::time::Duration;
use tracing::{error, info, warn};
use world_gateway::{create_gateway, HubHandle, ServerConfig, ShutdownState};

/// How long a graceful shutdown may take before the server task is abandoned.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Interval between health reports.
const MONITOR_INTERVAL: Duration = Duration::from_secs(60);

/// The gateway process: validated configuration plus the lifecycle around
/// [`world_gateway::GatewayServer`].
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// Configuration handed to the server
    server_config: ServerConfig,
}

impl Application {
    /// Loads the configuration file, applies CLI overrides and validates the
    /// result.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }

        if let Some(sim_address) = args.sim_address {
            config.upstream.target_address = sim_address;
        }

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        let server_config = config.to_server_config()?;
        Ok(Self { config, server_config })
    }

    /// Runs until a shutdown signal or a fatal server error.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        self.log_configuration_summary();

        let shutdown_state = ShutdownState::new();

        // The simulation may be down for a while; a signal during that wait
        // ends the process cleanly.
        let server = tokio::select! {
            server = create_gateway(self.server_config.clone()) => server?,
            signal = wait_for_shutdown_signal(&shutdown_state) => {
                signal?;
                info!("🛑 Shutdown requested before the simulation became reachable");
                return Ok(());
            }
        };

        let hub = server.hub_handle();
        let mut server_handle = tokio::spawn(server.run(shutdown_state.clone()));
        let monitoring_handle = tokio::spawn(monitor(hub.clone()));

        info!("✅ Gateway is now running!");
        info!(
            "🌐 Serving {} on {}",
            self.config.server.stream_path, self.config.server.bind_address
        );
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        tokio::select! {
            result = &mut server_handle => {
                monitoring_handle.abort();
                return match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => Err(format!("server task failed: {e}").into()),
                };
            }
            signal = wait_for_shutdown_signal(&shutdown_state) => signal?,
        }

        tokio::spawn(async move {
            if let Err(e) = wait_for_signal().await {
                error!("Failed to set up the second signal handler: {e}");
                return;
            }

            warn!("Shutdown signal received again, exiting immediately");
            std::process::exit(1);
        });

        info!("🛑 Shutdown signal received, beginning graceful shutdown...");
        monitoring_handle.abort();

        match tokio::time::timeout(SHUTDOWN_GRACE, server_handle).await {
            Ok(Ok(Ok(()))) => info!("✅ Server stopped"),
            Ok(Ok(Err(e))) => error!("❌ Server stopped with error: {e}"),
            Ok(Err(e)) => error!("❌ Server task failed: {e}"),
            Err(_) => warn!("⏰ Server did not stop within {:?}", SHUTDOWN_GRACE),
        }

        match hub.stats().await {
            Ok(stats) => info!(
                "📊 Final: {} updates applied | {} evictions | {} rooms",
                stats.updates_applied, stats.evictions, stats.rooms
            ),
            Err(_) => info!("📊 Hub already stopped; no final statistics"),
        }

        info!("👋 Gateway shutdown complete");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        let limits = &self.config.connections;
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  🛰️ Simulation: {}", self.config.upstream.target_address);
        info!("  📥 Max subscriptions per connection: {}", limits.max_subscriptions);
        info!("  📤 Delivery queue capacity: {}", limits.delivery_queue_capacity);
        info!(
            "  ⏱️ Read/write timeout: {}s/{}s, ping every {}s",
            limits.read_timeout_secs, limits.write_timeout_secs, limits.ping_interval_secs
        );
    }
}

async fn monitor(hub: HubHandle) {
    let mut interval = tokio::time::interval(MONITOR_INTERVAL);
    interval.tick().await;
    let mut last_updates = 0u64;

    loop {
        interval.tick().await;

        let Ok(stats) = hub.stats().await else {
            return;
        };
        let updates_this_period = stats.updates_applied.saturating_sub(last_updates);
        last_updates = stats.updates_applied;

        info!(
            "📊 Gateway Health - {} updates/min | {} connections | {} rooms | {} evictions",
            updates_this_period, stats.connections, stats.rooms, stats.evictions
        );
    }
}
