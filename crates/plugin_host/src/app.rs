//! Main application logic and lifecycle management.
//!
//! The `Application` owns the shared event bus and every loaded plugin. It
//! loads the enabled plugins in order and unloads them in reverse order on
//! shutdown.

use crate::{config::AppConfig, logging::display_banner, signals::wait_for_shutdown_signal};
use plugin_echo::{EchoPlugin, ECHO_PLUGIN_NAME, ECHO_REQUEST};
use plugin_lifecycle::{
    Event, EventBus, InMemoryEventBus, PluginConfig, PluginError, PluginHooks, PluginLifecycle,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A plugin driven by the host, whatever its hook implementation
pub type HostedPlugin = PluginLifecycle<Box<dyn PluginHooks>>;

/// Looks up a plugin compiled into the host by name.
fn builtin_plugin(name: &str, persistent_root: &Path) -> Option<(PluginConfig, Box<dyn PluginHooks>)> {
    match name {
        ECHO_PLUGIN_NAME => Some((
            EchoPlugin::config(persistent_root),
            Box::new(EchoPlugin::new()),
        )),
        _ => None,
    }
}

/// Main application struct.
///
/// Manages the shared event bus and the plugins loaded against it.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// Bus shared by every plugin
    event_bus: Arc<InMemoryEventBus>,
    /// Plugins in load order
    plugins: Vec<HostedPlugin>,
}

impl Application {
    /// Creates an application from an already validated configuration.
    pub fn new(config: AppConfig) -> Self {
        display_banner();

        Self {
            config,
            event_bus: Arc::new(InMemoryEventBus::new()),
            plugins: Vec::new(),
        }
    }

    /// Plugins currently held by the host, in load order
    pub fn plugins(&self) -> &[HostedPlugin] {
        &self.plugins
    }

    /// The shared event bus
    pub fn event_bus(&self) -> &Arc<InMemoryEventBus> {
        &self.event_bus
    }

    /// Constructs and loads every enabled plugin.
    ///
    /// A plugin that is unknown, fails construction or fails to load is
    /// logged and skipped. Returns the number of plugins now active.
    pub async fn load_plugins(&mut self) -> usize {
        let root = self.config.persistent_root();
        info!(
            "🔌 Loading {} plugin(s) from {}",
            self.config.plugins.enabled.len(),
            root.display()
        );

        for name in self.config.plugins.enabled.clone() {
            let Some((plugin_config, hooks)) = builtin_plugin(&name, &root) else {
                warn!("⚠️ Unknown plugin '{}' - skipping", name);
                continue;
            };

            let bus: Arc<dyn EventBus> = self.event_bus.clone();
            let mut plugin = match PluginLifecycle::new(bus, plugin_config, hooks) {
                Ok(plugin) => plugin,
                Err(e) => {
                    error!("❌ Failed to construct plugin '{}': {}", name, e);
                    continue;
                }
            };

            match plugin.load().await {
                Ok(()) => self.plugins.push(plugin),
                Err(e) => error!("❌ Failed to load plugin '{}': {}", name, e),
            }
        }

        info!(
            "📊 {} plugin(s) active, {} handler(s) registered",
            self.plugins.len(),
            self.event_bus.total_handlers()
        );
        self.plugins.len()
    }

    /// Unloads every held plugin in reverse load order.
    ///
    /// Failures are logged and do not stop the remaining unloads. Returns
    /// the errors that occurred.
    pub async fn unload_plugins(&mut self) -> Vec<PluginError> {
        let mut failures = Vec::new();

        while let Some(mut plugin) = self.plugins.pop() {
            if let Err(e) = plugin.unload().await {
                error!("❌ Plugin {} did not unload cleanly: {}", plugin.name(), e);
                failures.push(e);
            }
        }

        if failures.is_empty() {
            info!("✅ All plugins unloaded");
        } else {
            warn!("⚠️ {} plugin(s) failed to unload cleanly", failures.len());
        }
        failures
    }

    /// Publishes a single echo request and logs every reply.
    pub async fn greet(&self, text: &str) -> Result<Vec<serde_json::Value>, PluginError> {
        let event = Event::new(ECHO_REQUEST, json!({ "text": text }));
        let replies = self.event_bus.publish_async(event).await?;

        for reply in &replies {
            info!("📣 Reply: {}", reply);
        }
        Ok(replies)
    }

    /// Loads plugins, waits for a shutdown signal (or greets once), then
    /// unloads everything.
    pub async fn run(mut self, once: bool) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting plugin host");
        info!("📂 Persistent data: {}", self.config.plugins.persistent_dir);

        self.load_plugins().await;

        if once {
            if let Err(e) = self.greet("hello").await {
                error!("❌ Greeting failed: {}", e);
            }
        } else {
            info!("🛑 Press Ctrl+C to shut down");
            wait_for_shutdown_signal().await?;
        }

        self.unload_plugins().await;

        let stats = self.event_bus.stats();
        info!("📊 Final Statistics:");
        info!("  - Events published: {}", stats.events_published);
        info!("  - Handlers remaining: {}", stats.total_handlers);
        info!("✅ Plugin host shutdown complete");
        Ok(())
    }
}
