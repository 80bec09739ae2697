//! Plugin configuration record and lifecycle hooks

use crate::error::PluginError;
use crate::lifecycle::PluginContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};

/// Root directory for plugin working directories when none is configured
pub const DEFAULT_PERSISTENT_DIR: &str = "data";

fn default_persistent_root() -> PathBuf {
    PathBuf::from(DEFAULT_PERSISTENT_DIR)
}

/// Everything a plugin instance is constructed from.
///
/// Name and version are required; the rest defaults to empty. Extra
/// attributes go into `metadata` rather than onto the instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Plugin name, also the working directory and state file name
    #[serde(default)]
    pub name: String,
    /// Plugin version string
    #[serde(default)]
    pub version: String,
    /// Dependency name to version constraint. Resolution happens elsewhere.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    /// Extra named attributes supplied by the caller
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Directory that holds every plugin's working directory
    #[serde(default = "default_persistent_root")]
    pub persistent_root: PathBuf,
}

impl PluginConfig {
    /// Create a configuration with the required identity fields
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dependencies: BTreeMap::new(),
            metadata: HashMap::new(),
            persistent_root: default_persistent_root(),
        }
    }

    /// Add a dependency constraint
    pub fn with_dependency(mut self, name: impl Into<String>, constraint: impl Into<String>) -> Self {
        self.dependencies.insert(name.into(), constraint.into());
        self
    }

    /// Attach an extra attribute. A repeated key replaces the earlier value.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the persistent root directory
    pub fn with_persistent_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.persistent_root = root.into();
        self
    }

    /// Check that the identity fields are present
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.name.trim().is_empty() {
            return Err(PluginError::Validation("missing plugin name".to_string()));
        }
        // The name becomes a directory under the persistent root
        let mut components = Path::new(&self.name).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(part)), None) if part == self.name.as_str()
        ) {
            return Err(PluginError::Validation(format!(
                "invalid plugin name '{}': must be a single path component",
                self.name
            )));
        }
        if self.version.trim().is_empty() {
            return Err(PluginError::Validation("missing plugin version".to_string()));
        }
        Ok(())
    }
}

/// Extension points a concrete plugin overrides.
///
/// Every hook is a no-op by default. During unload `close` runs before
/// `on_unload`, and both run before persisted state is flushed.
#[async_trait]
pub trait PluginHooks: Send + Sync {
    /// Synchronous setup, run first by `load`
    fn init(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Asynchronous setup, run after `init`
    async fn on_load(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Synchronous teardown, first step of unload
    fn close(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Asynchronous teardown, second step of unload
    async fn on_unload(&mut self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
        Ok(())
    }
}

#[async_trait]
impl<T: PluginHooks + ?Sized> PluginHooks for Box<T> {
    fn init(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        (**self).init(ctx)
    }

    async fn on_load(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        (**self).on_load(ctx).await
    }

    fn close(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        (**self).close(ctx)
    }

    async fn on_unload(&mut self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        (**self).on_unload(ctx).await
    }
}

/// Hooks that do nothing, for plugins that only use the context
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl PluginHooks for NoopHooks {}
