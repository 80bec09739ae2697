//! # Plugin Lifecycle
//!
//! Lifecycle and event-coordination layer for pluggable components. A plugin
//! is constructed against a shared event bus, gets a private working
//! directory and a persisted document, subscribes handlers through its
//! context, and on unload flushes its state and releases every handler it
//! registered.
//!
//! ## Key Concepts
//!
//! - **EventBus**: publish/subscribe capability with prioritized handlers
//! - **PersistentStore**: load/save of one structured document
//! - **PluginHooks**: `init`/`on_load`/`close`/`on_unload` extension points
//! - **PluginLifecycle**: construction protocol and unload sequence
//!
//! ## Usage
//!
//! ```rust,no_run
//! use plugin_lifecycle::*;
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl PluginHooks for Echo {
//!     async fn on_load(&mut self, ctx: &mut PluginContext) -> Result<()> {
//!         ctx.register_handler("message", |event| Ok(event.data.clone()), 0);
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<()> {
//! let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());
//! let config = PluginConfig::new("Echo", "1.0").with_persistent_root("data");
//!
//! let mut plugin = PluginLifecycle::new(bus, config, Echo)?;
//! plugin.load().await?;
//! plugin.context().publish_sync(&Event::new("message", serde_json::json!("hi")))?;
//! plugin.unload().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod event;
pub mod lifecycle;
pub mod plugin;
pub mod store;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-exports for convenience
pub use error::{EventError, PluginError, StoreError};
pub use event::{Event, EventBus, EventHandlerFn, EventStats, HandlerId, InMemoryEventBus};
pub use lifecycle::{LifecycleState, PluginContext, PluginData, PluginLifecycle};
pub use plugin::{NoopHooks, PluginConfig, PluginHooks, DEFAULT_PERSISTENT_DIR};
pub use store::{Document, DocumentFormat, FileStore, LoadOutcome, PersistedState, PersistentStore};

/// Version of this crate
pub const PLUGIN_LIFECYCLE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, PluginError>;
