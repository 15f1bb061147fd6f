//! Namespace (group id) and saga resolution.
//!
//! Pure and total: every function falls through to the next priority on
//! failure and never errors. Paths are normalized to forward slashes before
//! any comparison.

use std::path::Path;

use bridge_config::{BridgeConfig, FolderMapping};
use obsidian_fs::{Frontmatter, SyncRecord};
use serde_json::Value;

/// Resolve the group id for a note.
///
/// Priority, highest first: explicit config override, `g_group_id`
/// frontmatter property (when property namespacing is on), longest-prefix
/// folder mapping (when folder namespacing is on), then the strategy default.
pub fn resolve_namespace(
    note_path: &str,
    frontmatter: &Frontmatter,
    config: &BridgeConfig,
) -> String {
    if let Some(group_id) = &config.group_id {
        let group_id = group_id.trim();
        if !group_id.is_empty() {
            return group_id.to_string();
        }
    }

    if config.enable_property_namespacing {
        if let Some(value) = frontmatter.get("g_group_id") {
            let namespace = scalar_to_string(value);
            let namespace = namespace.trim();
            if !namespace.is_empty() {
                return namespace.to_string();
            }
        }
    }

    if config.enable_folder_namespacing && !config.folder_namespace_mappings.is_empty() {
        let relative = vault_relative_path(note_path, config.vault_path.as_deref());
        if let Some(mapping) = match_folder_mapping(&relative, &config.folder_namespace_mappings) {
            return mapping.group_id.clone();
        }
    }

    // Strategy `vault` and `custom` both resolve to the configured default;
    // so does anything unrecognized.
    config.default_namespace.clone()
}

/// Note path relative to the vault root, forward-slash separated. The vault
/// prefix is stripped case-insensitively; paths outside the vault pass
/// through unchanged.
pub fn vault_relative_path(note_path: &str, vault_path: Option<&Path>) -> String {
    let note = note_path.replace('\\', "/");
    let Some(vault) = vault_path else {
        return note;
    };
    let vault = vault.to_string_lossy().replace('\\', "/");
    let vault = vault.trim_end_matches('/');
    if vault.is_empty() {
        return note;
    }
    let prefix = format!("{vault}/");
    match note.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(&prefix) => note[prefix.len()..].to_string(),
        _ => note,
    }
}

/// Find the mapping whose folder path is the longest case-insensitive prefix
/// of the note's folder, matching whole path segments only.
pub fn match_folder_mapping<'a>(
    relative_note_path: &str,
    mappings: &'a [FolderMapping],
) -> Option<&'a FolderMapping> {
    let note_folder = match relative_note_path.rsplit_once('/') {
        Some((folder, _file)) => folder.to_lowercase(),
        None => String::new(),
    };

    let mut sorted: Vec<&FolderMapping> = mappings
        .iter()
        .filter(|m| !m.folder_path.is_empty() && !m.group_id.is_empty())
        .collect();
    sorted.sort_by_key(|m| std::cmp::Reverse(m.folder_path.len()));

    sorted.into_iter().find(|mapping| {
        let folder = mapping
            .folder_path
            .replace('\\', "/")
            .trim_end_matches('/')
            .to_lowercase();
        note_folder == folder || note_folder.starts_with(&format!("{folder}/"))
    })
}

/// Resolve the saga name for a note under its matched folder mapping.
///
/// Policies: `none` → no saga; `singleSaga` → `all-<group>`; `customProperty`
/// → slug of the keyed frontmatter value; anything else (the default,
/// `byNoteType`) → slug of the frontmatter `type`. A missing value means no
/// saga rather than an error.
pub fn resolve_saga_name(
    saga_grouping: &str,
    saga_property_key: Option<&str>,
    group_id: &str,
    note_type: Option<&str>,
    frontmatter: &Frontmatter,
) -> Option<String> {
    match saga_grouping {
        "none" => None,
        "singleSaga" => Some(format!("all-{group_id}")),
        "customProperty" => {
            let key = saga_property_key?;
            let value = frontmatter.get(key)?;
            let value = scalar_to_string(value);
            if value.is_empty() {
                return None;
            }
            Some(format!("{}-{group_id}", slugify(&value, 80)))
        }
        _ => {
            let note_type = note_type?;
            if note_type.is_empty() {
                return None;
            }
            Some(format!("{}-{group_id}", slugify(note_type, 40)))
        }
    }
}

/// Resolve a saga for the note: find its folder mapping, then apply that
/// mapping's grouping policy. Notes outside any mapped folder have no saga.
pub fn resolve_saga(
    note_path: &str,
    frontmatter: &Frontmatter,
    group_id: &str,
    config: &BridgeConfig,
) -> Option<String> {
    let relative = vault_relative_path(note_path, config.vault_path.as_deref());
    let mapping = match_folder_mapping(&relative, &config.folder_namespace_mappings)?;
    let grouping = mapping.saga_grouping.as_deref().unwrap_or("byNoteType");
    let note_type = frontmatter.get("type").map(scalar_to_string);
    resolve_saga_name(
        grouping,
        mapping.saga_property_key.as_deref(),
        group_id,
        note_type.as_deref(),
        frontmatter,
    )
}

/// The most recent episode UUID recorded for a saga: greatest `last_sync`
/// wins; entries without a UUID are ignored. Absent records → `None`.
pub fn find_previous_in_saga(saga_name: &str, records: &[SyncRecord]) -> Option<String> {
    let mut matching: Vec<(&str, &str)> = records
        .iter()
        .flat_map(|record| &record.syncs)
        .filter(|sync| sync.saga_name.as_deref() == Some(saga_name))
        .filter_map(|sync| {
            let uuid = sync.episode_uuid.as_deref().filter(|u| !u.is_empty())?;
            Some((sync.last_sync.as_deref().unwrap_or(""), uuid))
        })
        .collect();
    matching.sort_by(|a, b| b.0.cmp(a.0));
    matching.first().map(|(_, uuid)| (*uuid).to_string())
}

/// Extraction instructions for a note: folder mapping override first, then
/// the vault-level instructions, then none.
pub fn resolve_custom_instructions(note_path: &str, config: &BridgeConfig) -> Option<String> {
    let relative = vault_relative_path(note_path, config.vault_path.as_deref());
    if let Some(mapping) = match_folder_mapping(&relative, &config.folder_namespace_mappings) {
        if let Some(instructions) = &mapping.custom_extraction_instructions {
            if !instructions.is_empty() {
                return Some(instructions.clone());
            }
        }
    }
    config
        .global_extraction_instructions
        .clone()
        .filter(|i| !i.is_empty())
}

/// Lowercase, spaces to dashes, truncated to `max` characters.
fn slugify(value: &str, max: usize) -> String {
    value
        .to_lowercase()
        .replace(' ', "-")
        .chars()
        .take(max)
        .collect()
}

/// String form of a frontmatter scalar, matching how the original stringified
/// arbitrary property values.
fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obsidian_fs::SagaSync;
    use serde_json::json;

    fn frontmatter(pairs: &[(&str, Value)]) -> Frontmatter {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn config_with_mappings(mappings: Vec<FolderMapping>) -> BridgeConfig {
        BridgeConfig {
            default_namespace: "books".to_string(),
            namespace_strategy: "vault".to_string(),
            enable_folder_namespacing: true,
            folder_namespace_mappings: mappings,
            ..Default::default()
        }
    }

    fn mapping(folder: &str, group: &str) -> FolderMapping {
        FolderMapping {
            folder_path: folder.to_string(),
            group_id: group.to_string(),
            saga_grouping: None,
            saga_property_key: None,
            custom_extraction_instructions: None,
        }
    }

    #[test]
    fn explicit_override_wins_over_everything() {
        let mut config = config_with_mappings(vec![mapping("Projects", "p")]);
        config.group_id = Some("forced".to_string());
        config.enable_property_namespacing = true;
        let fm = frontmatter(&[("g_group_id", json!("prop"))]);
        assert_eq!(resolve_namespace("Projects/x.md", &fm, &config), "forced");
    }

    #[test]
    fn property_namespace_second() {
        let mut config = config_with_mappings(vec![mapping("Projects", "p")]);
        config.enable_property_namespacing = true;
        let fm = frontmatter(&[("g_group_id", json!("prop"))]);
        assert_eq!(resolve_namespace("Projects/x.md", &fm, &config), "prop");
    }

    #[test]
    fn empty_property_falls_through() {
        let mut config = config_with_mappings(vec![mapping("Projects", "p")]);
        config.enable_property_namespacing = true;
        let fm = frontmatter(&[("g_group_id", json!("  "))]);
        assert_eq!(resolve_namespace("Projects/x.md", &fm, &config), "p");
    }

    #[test]
    fn folder_mapping_longest_prefix_match() {
        let config = config_with_mappings(vec![
            mapping("Projects", "all-projects"),
            mapping("Projects/2025", "p25"),
        ]);
        let fm = Frontmatter::new();
        assert_eq!(
            resolve_namespace("Projects/2025/notes/today.md", &fm, &config),
            "p25"
        );
        assert_eq!(resolve_namespace("Projects/old/x.md", &fm, &config), "all-projects");
    }

    #[test]
    fn folder_match_is_segment_aligned() {
        let config = config_with_mappings(vec![mapping("Projects/2025", "p25")]);
        let fm = Frontmatter::new();
        // "Projects/2025-archive" must not match "Projects/2025".
        assert_eq!(
            resolve_namespace("Projects/2025-archive/x.md", &fm, &config),
            "books"
        );
    }

    #[test]
    fn folder_match_is_case_insensitive_and_vault_relative() {
        let mut config = config_with_mappings(vec![mapping("Projects/2025", "p25")]);
        config.vault_path = Some("/home/me/Vault".into());
        let fm = Frontmatter::new();
        assert_eq!(
            resolve_namespace("/home/me/vault/projects/2025/today.md", &fm, &config),
            "p25"
        );
    }

    #[test]
    fn strategy_fallbacks_use_default_namespace() {
        for strategy in ["vault", "custom", "weird"] {
            let config = BridgeConfig {
                default_namespace: "books".to_string(),
                namespace_strategy: strategy.to_string(),
                ..Default::default()
            };
            assert_eq!(resolve_namespace("a/b.md", &Frontmatter::new(), &config), "books");
        }
    }

    #[test]
    fn saga_policies() {
        let fm = frontmatter(&[("project", json!("Big Launch")), ("type", json!("Daily Log"))]);
        assert_eq!(resolve_saga_name("none", None, "g", Some("x"), &fm), None);
        assert_eq!(
            resolve_saga_name("singleSaga", None, "g", None, &fm),
            Some("all-g".to_string())
        );
        assert_eq!(
            resolve_saga_name("customProperty", Some("project"), "g", None, &fm),
            Some("big-launch-g".to_string())
        );
        assert_eq!(
            resolve_saga_name("customProperty", Some("missing"), "g", None, &fm),
            None
        );
        assert_eq!(
            resolve_saga_name("byNoteType", None, "g", Some("Daily Log"), &fm),
            Some("daily-log-g".to_string())
        );
        assert_eq!(resolve_saga_name("byNoteType", None, "g", None, &fm), None);
    }

    #[test]
    fn saga_slug_truncation() {
        let long = "x".repeat(100);
        let fm = frontmatter(&[("k", json!(long))]);
        let saga = resolve_saga_name("customProperty", Some("k"), "g", None, &fm).unwrap();
        assert_eq!(saga.len(), 80 + "-g".len());
    }

    #[test]
    fn previous_in_saga_picks_greatest_last_sync() {
        let records = vec![SyncRecord {
            syncs: vec![
                SagaSync {
                    saga_name: Some("daily-books".to_string()),
                    episode_uuid: Some("U1".to_string()),
                    last_sync: Some("2030-01-01T00:00:00Z".to_string()),
                },
                SagaSync {
                    saga_name: Some("daily-books".to_string()),
                    episode_uuid: Some("U2".to_string()),
                    last_sync: Some("2030-02-01T00:00:00Z".to_string()),
                },
                SagaSync {
                    saga_name: Some("other".to_string()),
                    episode_uuid: Some("U3".to_string()),
                    last_sync: Some("2031-01-01T00:00:00Z".to_string()),
                },
            ],
        }];
        assert_eq!(
            find_previous_in_saga("daily-books", &records),
            Some("U2".to_string())
        );
        assert_eq!(find_previous_in_saga("unknown", &records), None);
        assert_eq!(find_previous_in_saga("daily-books", &[]), None);
    }

    #[test]
    fn previous_in_saga_skips_empty_uuids() {
        let records = vec![SyncRecord {
            syncs: vec![SagaSync {
                saga_name: Some("s".to_string()),
                episode_uuid: Some(String::new()),
                last_sync: Some("2030-01-01T00:00:00Z".to_string()),
            }],
        }];
        assert_eq!(find_previous_in_saga("s", &records), None);
    }

    #[test]
    fn custom_instructions_prefer_folder_mapping() {
        let mut config = config_with_mappings(vec![FolderMapping {
            folder_path: "Projects".to_string(),
            group_id: "p".to_string(),
            saga_grouping: None,
            saga_property_key: None,
            custom_extraction_instructions: Some("folder rules".to_string()),
        }]);
        config.global_extraction_instructions = Some("vault rules".to_string());

        assert_eq!(
            resolve_custom_instructions("Projects/x.md", &config).as_deref(),
            Some("folder rules")
        );
        assert_eq!(
            resolve_custom_instructions("Elsewhere/x.md", &config).as_deref(),
            Some("vault rules")
        );
        config.global_extraction_instructions = None;
        assert_eq!(resolve_custom_instructions("Elsewhere/x.md", &config), None);
    }

    #[test]
    fn resolve_saga_uses_mapping_policy() {
        let mut config = config_with_mappings(vec![FolderMapping {
            folder_path: "Journal".to_string(),
            group_id: "j".to_string(),
            saga_grouping: Some("singleSaga".to_string()),
            saga_property_key: None,
            custom_extraction_instructions: None,
        }]);
        config.vault_path = None;
        let saga = resolve_saga("Journal/today.md", &Frontmatter::new(), "j", &config);
        assert_eq!(saga, Some("all-j".to_string()));
        // Outside any mapped folder there is no saga.
        assert_eq!(resolve_saga("Other/x.md", &Frontmatter::new(), "g", &config), None);
    }
}
