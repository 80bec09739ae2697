use async_trait::async_trait;
use chrono::prelude::*;
use plugin_lifecycle::{Event, EventError, PluginConfig, PluginContext, PluginError, PluginHooks};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub const ECHO_PLUGIN_NAME: &str = "Echo";
pub const ECHO_PLUGIN_VERSION: &str = "1.0";

/// Event type the plugin answers
pub const ECHO_REQUEST: &str = "echo.request";
/// Announced once loading completes
pub const ECHO_ONLINE: &str = "echo.online";
/// Announced when unloading starts
pub const ECHO_OFFLINE: &str = "echo.offline";

const TOTAL_ECHOES_KEY: &str = "total_echoes";
const LAST_LOADED_KEY: &str = "last_loaded_at";
const FIRST_SEEN_KEY: &str = "first_seen_at";

// ============================================================================
// Echo Plugin
// ============================================================================

/// Answers every `echo.request` with its own text and keeps a running total
/// of echoes across restarts.
pub struct EchoPlugin {
    echoes: Arc<AtomicU64>,
    priority: i32,
}

impl EchoPlugin {
    pub fn new() -> Self {
        Self {
            echoes: Arc::new(AtomicU64::new(0)),
            priority: 0,
        }
    }

    /// Subscribe the echo handler with a specific priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Echoes answered, including those persisted by earlier runs
    pub fn total_echoes(&self) -> u64 {
        self.echoes.load(Ordering::Relaxed)
    }

    /// Configuration for this plugin under the given persistent root
    pub fn config(persistent_root: impl Into<std::path::PathBuf>) -> PluginConfig {
        PluginConfig::new(ECHO_PLUGIN_NAME, ECHO_PLUGIN_VERSION)
            .with_persistent_root(persistent_root)
            .with_metadata("description", "Echoes request text back to the sender")
    }
}

impl Default for EchoPlugin {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload of an `echo.request` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoRequest {
    pub text: String,
}

/// Value returned by the echo handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoReply {
    pub echo: String,
    pub count: u64,
}

#[async_trait]
impl PluginHooks for EchoPlugin {
    fn init(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let restored = ctx.data().get_as::<u64>(TOTAL_ECHOES_KEY).unwrap_or(0);
        self.echoes.store(restored, Ordering::Relaxed);

        if ctx.first_load() {
            info!("🎉 EchoPlugin: first start, working in {}", ctx.work_path().display());
            ctx.data_mut().set(FIRST_SEEN_KEY, Utc::now().to_rfc3339());
        } else {
            debug!("🔁 EchoPlugin: restored {} echoes from a previous run", restored);
        }
        Ok(())
    }

    async fn on_load(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let echoes = self.echoes.clone();
        ctx.register_handler(
            ECHO_REQUEST,
            move |event: &Event| {
                let request: EchoRequest = event.payload()?;
                let count = echoes.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("📣 EchoPlugin: '{}' (#{})", request.text, count);

                serde_json::to_value(EchoReply {
                    echo: request.text,
                    count,
                })
                .map_err(EventError::from)
            },
            self.priority,
        );

        ctx.data_mut().set(LAST_LOADED_KEY, Utc::now().to_rfc3339());

        ctx.publish_async(Event::new(
            ECHO_ONLINE,
            serde_json::json!({
                "plugin": ctx.name(),
                "version": ctx.version(),
                "first_load": ctx.first_load(),
            }),
        ))
        .await?;

        info!("👋 EchoPlugin: ✅ ready");
        Ok(())
    }

    fn close(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        ctx.publish_sync(&Event::new(
            ECHO_OFFLINE,
            serde_json::json!({
                "plugin": ctx.name(),
                "total_echoes": self.total_echoes(),
            }),
        ))?;
        Ok(())
    }

    async fn on_unload(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let lock = ctx.lock();
        let _guard = lock.lock().await;

        let total = self.total_echoes();
        ctx.data_mut().set(TOTAL_ECHOES_KEY, total);
        info!("👋 EchoPlugin: shutting down after {} echoes", total);
        Ok(())
    }
}
