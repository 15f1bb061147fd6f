//! Plugin `data.json` location.

use std::path::{Path, PathBuf};

/// Current plugin id under `.obsidian/plugins/`.
pub const PLUGIN_ID: &str = "megamem-mcp";
/// Pre-rename plugin id kept for vaults that never re-installed.
pub const LEGACY_PLUGIN_ID: &str = "obsidian-graphiti-mcp";

/// Resolve the schema `data.json` for a vault.
///
/// Priority: an explicit override (the `PLUGIN_DATA_PATH` environment
/// variable, passed in by the caller) wins outright; otherwise the current
/// plugin id is preferred and the legacy id is the fallback even when neither
/// file exists yet.
pub fn plugin_data_path(vault_path: &Path, explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let primary = vault_path
        .join(".obsidian")
        .join("plugins")
        .join(PLUGIN_ID)
        .join("data.json");
    if primary.exists() {
        return primary;
    }
    let legacy = vault_path
        .join(".obsidian")
        .join("plugins")
        .join(LEGACY_PLUGIN_ID)
        .join("data.json");
    if legacy.exists() { legacy } else { primary }
}

/// Derive the vault root from a plugin data path.
///
/// `vault/.obsidian/plugins/<id>/data.json` → `vault`, likewise for the
/// plugin directory itself. Paths outside the plugin layout are returned
/// unchanged (assumed to already be a vault root).
pub fn vault_root_from_data_path(path: &Path) -> PathBuf {
    let is_data_json = path.file_name().is_some_and(|n| n == "data.json");
    let in_plugins = path.components().any(|c| c.as_os_str() == "plugins");
    if !in_plugins {
        return path.to_path_buf();
    }
    let levels = if is_data_json { 4 } else { 3 };
    let mut root = path;
    for _ in 0..levels {
        match root.parent() {
            Some(parent) => root = parent,
            None => return path.to_path_buf(),
        }
    }
    root.to_path_buf()
}
