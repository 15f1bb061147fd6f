//! Sync records persisted by the editor plugin.
//!
//! `<vault>/.obsidian/plugins/<plugin-id>/sync.json` records every episode
//! the plugin has pushed, including the saga each one belongs to. The bridge
//! reads this file for saga chain lookups and never writes it.

use std::path::Path;

use serde::Deserialize;

use crate::plugin_data::{LEGACY_PLUGIN_ID, PLUGIN_ID};

/// One synced episode within a saga.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SagaSync {
    #[serde(default)]
    pub saga_name: Option<String>,
    #[serde(default)]
    pub episode_uuid: Option<String>,
    /// ISO 8601 timestamp; lexicographic order equals chronological order.
    #[serde(default)]
    pub last_sync: Option<String>,
}

/// One note's sync history.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SyncRecord {
    #[serde(default)]
    pub syncs: Vec<SagaSync>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncFile {
    #[serde(default)]
    sync_records: Vec<SyncRecord>,
}

/// Load sync records for a vault. Missing or unparseable files yield an empty
/// list, so saga chaining silently degrades to "no previous episode".
pub fn load_sync_records(vault_path: &Path) -> Vec<SyncRecord> {
    for plugin_id in [PLUGIN_ID, LEGACY_PLUGIN_ID] {
        let path = vault_path
            .join(".obsidian")
            .join("plugins")
            .join(plugin_id)
            .join("sync.json");
        if !path.exists() {
            continue;
        }
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<SyncFile>(&raw) {
                Ok(file) => return file.sync_records,
                Err(err) => {
                    tracing::debug!("could not parse sync records at {}: {err}", path.display());
                    return Vec::new();
                }
            },
            Err(err) => {
                tracing::debug!("could not read sync records at {}: {err}", path.display());
                return Vec::new();
            }
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sync_file(vault: &Path, plugin_id: &str, contents: &str) {
        let dir = vault.join(".obsidian").join("plugins").join(plugin_id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("sync.json"), contents).unwrap();
    }

    #[test]
    fn loads_records_from_primary_plugin_dir() {
        let vault = tempfile::tempdir().unwrap();
        write_sync_file(
            vault.path(),
            PLUGIN_ID,
            r#"{"sync_records": [{"syncs": [
                {"saga_name": "daily-books", "episode_uuid": "u1", "last_sync": "2030-01-01T00:00:00Z"}
            ]}]}"#,
        );

        let records = load_sync_records(vault.path());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].syncs[0].saga_name.as_deref(), Some("daily-books"));
    }

    #[test]
    fn falls_back_to_legacy_plugin_dir() {
        let vault = tempfile::tempdir().unwrap();
        write_sync_file(vault.path(), LEGACY_PLUGIN_ID, r#"{"sync_records": [{"syncs": []}]}"#);
        assert_eq!(load_sync_records(vault.path()).len(), 1);
    }

    #[test]
    fn missing_file_yields_empty() {
        let vault = tempfile::tempdir().unwrap();
        assert!(load_sync_records(vault.path()).is_empty());
    }

    #[test]
    fn unparseable_file_yields_empty() {
        let vault = tempfile::tempdir().unwrap();
        write_sync_file(vault.path(), PLUGIN_ID, "not json at all");
        assert!(load_sync_records(vault.path()).is_empty());
    }
}
