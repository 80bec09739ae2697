//! # Plugin Host - Main Entry Point
//!
//! Runs the built-in plugins against a shared in-process event bus. This
//! entry point handles CLI parsing, configuration loading and the
//! application lifecycle.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! plugin_host
//!
//! # Keep plugin state somewhere else
//! plugin_host --data-dir /var/lib/plugin_host --log-level debug
//!
//! # Load, greet once, unload
//! plugin_host --once
//! ```
//!
//! ## Configuration
//!
//! The host loads configuration from a TOML file (default: `config.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! Plugins are unloaded in reverse load order on:
//! - SIGINT (Ctrl+C)
//! - SIGTERM (Unix systems)

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

pub use app::{Application, HostedPlugin};
pub use cli::CliArgs;
pub use config::{AppConfig, LoggingSettings, PluginSettings};

/// Main entry point for the plugin host.
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging is not up yet, so a broken file falls back to defaults here
    // and the real error surfaces once logging is configured.
    let loaded = AppConfig::load_from_file(&args.config_path).await;
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => AppConfig::default(),
    };
    config.apply_overrides(&args);

    if let Err(e) = logging::setup_logging(&config.logging) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = loaded {
        error!("❌ Failed to load {}: {e}", args.config_path.display());
        std::process::exit(1);
    }

    if let Err(e) = config.validate() {
        error!("❌ Configuration validation failed: {e}");
        std::process::exit(1);
    }

    let app = Application::new(config);
    if let Err(e) = app.run(args.once).await {
        error!("❌ Application error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
