//! Utility functions and helpers

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Directory that holds a plugin's private files: `<root>/<name>`
pub fn work_path_for(persistent_root: &Path, plugin_name: &str) -> PathBuf {
    persistent_root.join(plugin_name)
}

/// State file inside a plugin's working directory: `<work_path>/<name>.json`
pub fn state_file_for(work_path: &Path, plugin_name: &str) -> PathBuf {
    work_path.join(format!("{}.json", plugin_name))
}

/// Lower-cased file extension, if any
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}
