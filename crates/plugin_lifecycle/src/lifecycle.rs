//! Plugin lifecycle management
//!
//! [`PluginLifecycle`] owns one plugin instance: its hooks, its working
//! directory, its persisted state and every handler it subscribed on the bus.
//!
//! Construction runs in a fixed order:
//!
//! 1. validate name and version (nothing touched on failure)
//! 2. compute `<persistent_root>/<name>` and bind the state file to it
//! 3. load persisted state, falling back to an empty document when nothing
//!    was saved yet
//! 4. create the working directory, recording whether it already existed
//!
//! Unloading runs `close`, `on_unload`, the state flush and handler
//! unsubscription, in that order. Handlers are released when an earlier step
//! fails, and any handlers still tracked when the context is dropped are
//! released then.

use crate::error::{EventError, PluginError};
use crate::event::{Event, EventBus, EventHandlerFn, HandlerId};
use crate::plugin::{PluginConfig, PluginHooks};
use crate::store::{FileStore, PersistedState, PersistentStore};
use crate::utils::{state_file_for, work_path_for};
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Persisted state as held by a plugin context
pub type PluginData = PersistedState<Box<dyn PersistentStore>>;

/// Where a plugin instance is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, load hooks not run yet
    Constructed,
    /// Load hooks completed
    Active,
    /// Unload sequence in progress
    Unloading,
    /// Unload sequence completed
    Unloaded,
    /// A load or unload step failed
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Constructed => "constructed",
            LifecycleState::Active => "active",
            LifecycleState::Unloading => "unloading",
            LifecycleState::Unloaded => "unloaded",
            LifecycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Everything a plugin can reach from its hooks
pub struct PluginContext {
    config: PluginConfig,
    event_bus: Arc<dyn EventBus>,
    work_path: PathBuf,
    first_load: bool,
    data: PluginData,
    handlers: Vec<HandlerId>,
    lock: Arc<Mutex<()>>,
}

impl PluginContext {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Extra attribute supplied at construction
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.config.metadata.get(key)
    }

    /// Private working directory, `<persistent_root>/<name>`
    pub fn work_path(&self) -> &Path {
        &self.work_path
    }

    /// True when the working directory was created by this instance
    pub fn first_load(&self) -> bool {
        self.first_load
    }

    /// Resolve a path against the working directory. Absolute paths pass through.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.work_path.join(path)
    }

    pub fn data(&self) -> &PluginData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut PluginData {
        &mut self.data
    }

    /// Lock for the plugin's own critical sections. The lifecycle never takes it.
    pub fn lock(&self) -> Arc<Mutex<()>> {
        self.lock.clone()
    }

    pub fn event_bus(&self) -> Arc<dyn EventBus> {
        self.event_bus.clone()
    }

    /// Handler ids currently tracked, in registration order
    pub fn handler_ids(&self) -> &[HandlerId] {
        &self.handlers
    }

    /// Subscribe a handler on the bus and track it for release on unload.
    ///
    /// Registering the same handler twice subscribes it twice.
    pub fn register_handler<F>(&mut self, event_type: &str, handler: F, priority: i32) -> HandlerId
    where
        F: Fn(&Event) -> Result<Value, EventError> + Send + Sync + 'static,
    {
        let handler: EventHandlerFn = Arc::new(handler);
        let handler_id = self.event_bus.subscribe(event_type, handler, priority);
        self.handlers.push(handler_id);
        debug!("🔌 {}: registered handler {} for {}", self.config.name, handler_id, event_type);
        handler_id
    }

    /// Unsubscribe every tracked handler once, in registration order.
    ///
    /// Ids the bus no longer knows are logged and skipped.
    pub fn unregister_handlers(&mut self) {
        if self.handlers.is_empty() {
            return;
        }

        let count = self.handlers.len();
        for handler_id in self.handlers.drain(..) {
            if let Err(e) = self.event_bus.unsubscribe(handler_id) {
                warn!("⚠️ {}: could not unsubscribe {}: {}", self.config.name, handler_id, e);
            }
        }
        debug!("🧹 {}: released {} handler(s)", self.config.name, count);
    }

    /// Publish and wait for every handler
    pub fn publish_sync(&self, event: &Event) -> Result<Vec<Value>, EventError> {
        self.event_bus.publish_sync(event)
    }

    /// Publish without waiting; the returned future yields the handler results
    pub fn publish_async(&self, event: Event) -> BoxFuture<'static, Result<Vec<Value>, EventError>> {
        self.event_bus.publish_async(event)
    }
}

impl Drop for PluginContext {
    fn drop(&mut self) {
        self.unregister_handlers();
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("name", &self.config.name)
            .field("version", &self.config.version)
            .field("work_path", &self.work_path)
            .field("first_load", &self.first_load)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Create `path` with a single attempt, creating missing parents first.
///
/// Returns `true` when the directory was created and `false` when it already
/// existed. Any other failure is an error.
pub(crate) fn create_work_dir(path: &Path) -> Result<bool, PluginError> {
    let directory_error = |source| PluginError::Directory {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(directory_error)?;
    }

    match std::fs::create_dir(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(directory_error(e)),
    }
}

/// One plugin instance and its lifecycle
pub struct PluginLifecycle<H: PluginHooks> {
    hooks: H,
    context: PluginContext,
    state: LifecycleState,
}

impl<H: PluginHooks> PluginLifecycle<H> {
    /// Construct a plugin whose state lives in `<work_path>/<name>.json`
    pub fn new(event_bus: Arc<dyn EventBus>, config: PluginConfig, hooks: H) -> Result<Self, PluginError> {
        Self::with_store(event_bus, config, hooks, |path| FileStore::new(path))
    }

    /// Construct a plugin with a custom store, built from the state file path
    pub fn with_store<S, F>(
        event_bus: Arc<dyn EventBus>,
        config: PluginConfig,
        hooks: H,
        make_store: F,
    ) -> Result<Self, PluginError>
    where
        S: PersistentStore + 'static,
        F: FnOnce(PathBuf) -> S,
    {
        config.validate()?;

        let work_path = work_path_for(&config.persistent_root, &config.name);
        let store: Box<dyn PersistentStore> = Box::new(make_store(state_file_for(&work_path, &config.name)));

        let outcome = store.load().map_err(|source| PluginError::PersistenceLoad {
            plugin: config.name.clone(),
            source,
        })?;
        let data = PersistedState::from_outcome(store, outcome);

        let first_load = create_work_dir(&work_path)?;
        if first_load {
            info!("📁 {}: created working directory {}", config.name, work_path.display());
        }

        info!(
            "🔧 Constructed plugin {} v{} (first load: {}, restored state: {})",
            config.name,
            config.version,
            first_load,
            data.was_restored()
        );

        Ok(Self {
            hooks,
            context: PluginContext {
                config,
                event_bus,
                work_path,
                first_load,
                data,
                handlers: Vec::new(),
                lock: Arc::new(Mutex::new(())),
            },
            state: LifecycleState::Constructed,
        })
    }

    pub fn name(&self) -> &str {
        self.context.name()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut PluginContext {
        &mut self.context
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    fn invalid_state(&self, operation: &'static str) -> PluginError {
        PluginError::InvalidState {
            plugin: self.context.config.name.clone(),
            operation,
            state: self.state,
        }
    }

    /// Run `init` then `on_load`.
    ///
    /// On failure the handlers registered so far are released and the
    /// plugin is left `Failed`.
    pub async fn load(&mut self) -> Result<(), PluginError> {
        if self.state != LifecycleState::Constructed {
            return Err(self.invalid_state("load"));
        }

        match self.run_load_steps().await {
            Ok(()) => {
                self.state = LifecycleState::Active;
                info!("✅ Plugin {} loaded", self.context.config.name);
                Ok(())
            }
            Err(e) => {
                self.context.unregister_handlers();
                self.state = LifecycleState::Failed;
                error!("❌ Plugin {} failed to load: {}", self.context.config.name, e);
                Err(e)
            }
        }
    }

    async fn run_load_steps(&mut self) -> Result<(), PluginError> {
        self.hooks.init(&mut self.context)?;
        self.hooks.on_load(&mut self.context).await
    }

    /// Run the unload sequence: `close`, `on_unload`, flush, release handlers.
    ///
    /// Only accepted once, from `Constructed` or `Active`. A hook error is
    /// returned as is; a flush error is wrapped in
    /// [`PluginError::UnloadFlush`]. Either way the remaining steps up to the
    /// flush are skipped, handlers are still released and the plugin ends
    /// `Failed`.
    ///
    /// There is no cancellation support. If the returned future is dropped
    /// mid-sequence the plugin stays `Unloading`, later calls return
    /// [`PluginError::InvalidState`], and its handlers stay subscribed until
    /// the plugin itself is dropped.
    pub async fn unload(&mut self) -> Result<(), PluginError> {
        match self.state {
            LifecycleState::Constructed | LifecycleState::Active => {}
            _ => return Err(self.invalid_state("unload")),
        }

        self.state = LifecycleState::Unloading;
        info!("🛑 Unloading plugin {}", self.context.config.name);

        let result = self.run_unload_steps().await;
        self.context.unregister_handlers();

        match result {
            Ok(()) => {
                self.state = LifecycleState::Unloaded;
                info!("👋 Plugin {} unloaded", self.context.config.name);
                Ok(())
            }
            Err(e) => {
                self.state = LifecycleState::Failed;
                error!("❌ Plugin {} failed to unload cleanly: {}", self.context.config.name, e);
                Err(e)
            }
        }
    }

    async fn run_unload_steps(&mut self) -> Result<(), PluginError> {
        self.hooks.close(&mut self.context)?;
        self.hooks.on_unload(&mut self.context).await?;

        self.context
            .data
            .save()
            .map_err(|source| PluginError::UnloadFlush {
                plugin: self.context.config.name.clone(),
                source,
            })
    }
}

impl<H: PluginHooks> fmt::Debug for PluginLifecycle<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLifecycle")
            .field("state", &self.state)
            .field("context", &self.context)
            .finish()
    }
}
