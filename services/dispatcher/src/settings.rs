//! Worker endpoint configuration.
//!
//! Endpoints come either from repeated command-line flags or from a JSON
//! settings file mapping worker names to base urls. File entries are read
//! into a sorted map so fleet ordering, and therefore round-robin
//! placement, is deterministic across runs.

use std::collections::BTreeMap;
use std::path::Path;

use crate::DispatchError;

pub const DEFAULT_SETTINGS_PATH: &str = "settings.json";

/// Resolves the worker list: explicit urls win outright, otherwise the
/// settings file is consulted.
pub fn resolve_workers(
    explicit: &[String],
    settings_path: &Path,
) -> Result<Vec<String>, DispatchError> {
    if !explicit.is_empty() {
        return Ok(explicit.iter().map(|url| normalize_url(url)).collect());
    }
    load_settings(settings_path)
}

pub fn load_settings(path: &Path) -> Result<Vec<String>, DispatchError> {
    let raw = std::fs::read_to_string(path).map_err(|e| DispatchError::SettingsIo {
        path: path.display().to_string(),
        source: e,
    })?;
    let entries: BTreeMap<String, String> =
        serde_json::from_str(&raw).map_err(|e| DispatchError::SettingsParse {
            path: path.display().to_string(),
            source: e,
        })?;
    Ok(entries.values().map(|url| normalize_url(url)).collect())
}

fn normalize_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
