//! # World Gateway process
//!
//! Command-line entry point: parses arguments, loads `config.toml`, sets up
//! logging and runs the [`app::Application`].
//!
//! ## Exit codes
//!
//! * **0**: clean shutdown after a signal
//! * **1**: invalid configuration, bind failure, terrain bootstrap failure,
//!   or the simulation's entity feed ending

use tracing::error;

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Runs the gateway process to completion.
///
/// Called from `main`, which owns the runtime.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging comes up before the application so load errors are visible;
    // the application reloads the file and reports them properly.
    let config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Gateway error: {e}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start gateway: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use config::{LoggingSettings, ServerSettings};
