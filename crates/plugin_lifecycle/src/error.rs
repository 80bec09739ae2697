//! Error types for the plugin lifecycle core

use std::path::PathBuf;

/// Main error type for plugin construction, hooks and unloading
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Identity metadata missing or malformed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Persisted state could not be loaded
    #[error("Plugin {plugin}: failed to load persisted data: {source}")]
    PersistenceLoad {
        plugin: String,
        #[source]
        source: StoreError,
    },

    /// Working directory could not be created
    #[error("Failed to create working directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisted state could not be flushed during unload
    #[error("Plugin {plugin}: error saving persisted data: {source}")]
    UnloadFlush {
        plugin: String,
        #[source]
        source: StoreError,
    },

    /// Lifecycle operation requested from a state that does not allow it
    #[error("Plugin {plugin}: cannot {operation} while {state}")]
    InvalidState {
        plugin: String,
        operation: &'static str,
        state: crate::lifecycle::LifecycleState,
    },

    /// Error raised by a plugin's own hook
    #[error("Plugin hook failed: {0}")]
    Hook(String),

    /// Event bus error
    #[error("Event system error: {0}")]
    Event(#[from] EventError),
}

impl PluginError {
    /// Create a hook error with a message
    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook(message.into())
    }
}

/// Errors raised by a persistent store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The file extension does not map to a known document format
    #[error("Unknown file type: {}", .0.display())]
    FileTypeUnknown(PathBuf),

    /// Existing data could not be decoded
    #[error("Failed to load {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    /// Data could not be encoded or written
    #[error("Failed to save {}: {reason}", path.display())]
    Save { path: PathBuf, reason: String },

    /// The target directory does not exist
    #[error("Path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur on the event bus
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// Handler execution failed
    #[error("Handler execution failed: {0}")]
    HandlerExecutionFailed(String),

    /// Handler id not known to the bus
    #[error("Handler not found: {0}")]
    HandlerNotFound(String),

    /// Invalid event format
    #[error("Invalid event format: {0}")]
    InvalidEventFormat(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::InvalidEventFormat(err.to_string())
    }
}
