//! Persistent store for plugin-private documents
//!
//! A store is bound to one file. Loading distinguishes "nothing persisted yet"
//! from a real failure through [`LoadOutcome`], so callers branch on it instead
//! of intercepting an error.

use crate::error::StoreError;
use crate::utils::extension_of;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Structured document persisted by a plugin
pub type Document = serde_json::Map<String, Value>;

/// Result of a successful load attempt
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// A document was read and decoded
    Loaded(Document),
    /// No data has been persisted yet (missing or empty file)
    NotFound,
}

/// Load/save capability for a single structured document
pub trait PersistentStore: Send + Sync {
    /// Location the store reads from and writes to
    fn path(&self) -> &Path;

    /// Read the document
    fn load(&self) -> Result<LoadOutcome, StoreError>;

    /// Write the document
    fn save(&self, document: &Document) -> Result<(), StoreError>;
}

impl<T: PersistentStore + ?Sized> PersistentStore for Box<T> {
    fn path(&self) -> &Path {
        (**self).path()
    }

    fn load(&self) -> Result<LoadOutcome, StoreError> {
        (**self).load()
    }

    fn save(&self, document: &Document) -> Result<(), StoreError> {
        (**self).save(document)
    }
}

/// On-disk document formats, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Toml,
}

impl DocumentFormat {
    /// Detect the format of a path
    pub fn from_path(path: &Path) -> Option<Self> {
        match extension_of(path)?.as_str() {
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }
}

/// File-backed store speaking JSON or TOML
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Bind a store to a file. Nothing is touched on disk until load or save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn format(&self) -> Result<DocumentFormat, StoreError> {
        DocumentFormat::from_path(&self.path)
            .ok_or_else(|| StoreError::FileTypeUnknown(self.path.clone()))
    }

    fn load_error(&self, reason: impl ToString) -> StoreError {
        StoreError::Load {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn save_error(&self, reason: impl ToString) -> StoreError {
        StoreError::Save {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl PersistentStore for FileStore {
    fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<LoadOutcome, StoreError> {
        let format = self.format()?;

        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No persisted data at {}", self.path.display());
                return Ok(LoadOutcome::NotFound);
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        if text.trim().is_empty() {
            return Ok(LoadOutcome::NotFound);
        }

        let value: Value = match format {
            DocumentFormat::Json => serde_json::from_str(&text).map_err(|e| self.load_error(e))?,
            DocumentFormat::Toml => toml::from_str(&text).map_err(|e| self.load_error(e))?,
        };

        match value {
            Value::Object(document) => Ok(LoadOutcome::Loaded(document)),
            other => Err(self.load_error(format!(
                "expected a document at the top level, found {}",
                kind_of(&other)
            ))),
        }
    }

    fn save(&self, document: &Document) -> Result<(), StoreError> {
        let format = self.format()?;

        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            if !parent.is_dir() {
                return Err(StoreError::PathNotFound(parent.to_path_buf()));
            }
        }

        let text = match format {
            DocumentFormat::Json => {
                serde_json::to_string_pretty(document).map_err(|e| self.save_error(e))?
            }
            DocumentFormat::Toml => toml::to_string_pretty(document).map_err(|e| self.save_error(e))?,
        };

        std::fs::write(&self.path, text).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::PathNotFound(self.path.clone()),
            _ => self.save_error(e),
        })?;

        debug!("💾 Saved {} keys to {}", document.len(), self.path.display());
        Ok(())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A plugin's live state: the document plus the store it flushes to.
///
/// When nothing was persisted yet the document starts empty, but the store
/// binding is the same, so a later [`PersistedState::save`] still lands in the
/// right file.
pub struct PersistedState<S: PersistentStore> {
    store: S,
    document: Document,
    restored: bool,
}

impl<S: PersistentStore> PersistedState<S> {
    /// Build the state from the outcome of a load attempt
    pub fn from_outcome(store: S, outcome: LoadOutcome) -> Self {
        match outcome {
            LoadOutcome::Loaded(document) => Self {
                store,
                document,
                restored: true,
            },
            LoadOutcome::NotFound => Self::fresh(store),
        }
    }

    /// Empty state bound to a store
    pub fn fresh(store: S) -> Self {
        Self {
            store,
            document: Document::new(),
            restored: false,
        }
    }

    /// Whether the document came from disk
    pub fn was_restored(&self) -> bool {
        self.restored
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.document.get(key)
    }

    /// Read a value and decode it into a concrete type
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.document
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Set a value, returning the previous one
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.document.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.document.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.document.is_empty()
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Flush the document to the bound store
    pub fn save(&self) -> Result<(), StoreError> {
        self.store.save(&self.document)
    }
}

impl<S: PersistentStore> std::fmt::Debug for PersistedState<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedState")
            .field("path", &self.store.path())
            .field("document", &self.document)
            .field("restored", &self.restored)
            .finish()
    }
}
