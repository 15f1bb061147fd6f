//! The vault backend boundary.
//!
//! One trait, one method per vault tool, identical result envelopes
//! (`{success, payload, error, error_code?}` as JSON values). The tool
//! dispatcher never branches on which implementation it holds: the
//! [`HubBackend`] drives a [`VaultLink`] (the local hub or the remote RPC
//! bridge), and [`crate::CliBackend`] shells out to the editor's CLI.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use vault_hub::{OperationResponse, VaultLink};

/// Default forwarded-operation timeout.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(20);
/// Folder exploration can walk large vaults.
const EXPLORE_TIMEOUT: Duration = Duration::from_secs(30);

/// Every field an `update` may carry; presence is validated per mode before
/// dispatch. `extra` is the pass-through bag for editor-based methods, which
/// the editor side validates.
#[derive(Debug, Clone, Default)]
pub struct UpdateNoteRequest {
    pub path: String,
    pub editing_mode: String,
    pub content: Option<String>,
    pub frontmatter_changes: Option<Map<String, Value>>,
    pub append_content: Option<String>,
    pub replacement_content: Option<String>,
    pub range_start_line: Option<i64>,
    pub range_start_char: Option<i64>,
    pub range_end_line: Option<i64>,
    pub range_end_char: Option<i64>,
    pub editor_method: Option<String>,
    pub extra: Map<String, Value>,
    pub vault_id: Option<String>,
}

/// Narrow trait consumed by the tool dispatcher; see module docs.
#[async_trait]
pub trait VaultBackend: Send + Sync {
    async fn search_notes(
        &self,
        query: &str,
        search_mode: &str,
        max_results: u32,
        include_context: bool,
        path: Option<&str>,
        vault_id: Option<&str>,
    ) -> Value;

    async fn read_note(&self, path: &str, include_line_map: bool, vault_id: Option<&str>)
    -> Value;

    async fn create_note(&self, path: &str, content: &str, vault_id: Option<&str>) -> Value;

    async fn update_note(&self, request: UpdateNoteRequest) -> Value;

    async fn list_vaults(&self) -> Value;

    async fn explore_folders(
        &self,
        path: Option<&str>,
        query: Option<&str>,
        format: &str,
        max_depth: u32,
        vault_id: Option<&str>,
    ) -> Value;

    async fn create_note_with_template(
        &self,
        request_type: &str,
        file_name: &str,
        content: &str,
        target_folder: &str,
        vault_id: Option<&str>,
    ) -> Value;

    async fn manage_note(
        &self,
        operation: &str,
        path: &str,
        new_path: Option<&str>,
        vault_id: Option<&str>,
    ) -> Value;

    async fn manage_folder(
        &self,
        operation: &str,
        folder_path: &str,
        new_folder_path: Option<&str>,
        vault_id: Option<&str>,
    ) -> Value;
}

pub(crate) fn failure(error: impl Into<String>, error_code: &str) -> Value {
    json!({"success": false, "error": error.into(), "error_code": error_code})
}

fn envelope(response: Option<OperationResponse>) -> Value {
    match response {
        Some(response) => serde_json::to_value(&response)
            .unwrap_or_else(|_| json!({"success": false, "error": "Unencodable response"})),
        None => json!({"success": false, "error": "No response from vault"}),
    }
}

/// Vault tools driven through a [`VaultLink`].
pub struct HubBackend {
    link: Arc<dyn VaultLink>,
}

impl HubBackend {
    pub fn new(link: Arc<dyn VaultLink>) -> Self {
        HubBackend { link }
    }

    /// Resolve the target vault: explicit id must be connected, otherwise the
    /// active vault is used. Errors come back as ready-made envelopes.
    async fn resolve_vault(&self, vault_id: Option<&str>) -> Result<String, Value> {
        let connected = self.link.connected_vaults().await;
        if connected.is_empty() {
            return Err(failure(
                "No Obsidian vaults are currently connected",
                "NO_VAULTS",
            ));
        }
        if let Some(vault_id) = vault_id {
            if !connected.iter().any(|v| v == vault_id) {
                return Err(failure(
                    format!(
                        "Vault '{vault_id}' is not connected. Connected vaults: {connected:?}"
                    ),
                    "INVALID_VAULT",
                ));
            }
            return Ok(vault_id.to_string());
        }
        match self.link.active_vault().await {
            Some(active) => Ok(active),
            None => Err(failure(
                format!("No vault specified and no active vault set. Connected vaults: {connected:?}"),
                "NO_ACTIVE_VAULT",
            )),
        }
    }

    async fn forward(&self, vault_id: &str, operation: &str, params: Value) -> Value {
        envelope(
            self.link
                .request_file_operation(vault_id, operation, params, OPERATION_TIMEOUT)
                .await,
        )
    }
}

#[async_trait]
impl VaultBackend for HubBackend {
    async fn search_notes(
        &self,
        query: &str,
        search_mode: &str,
        max_results: u32,
        include_context: bool,
        path: Option<&str>,
        vault_id: Option<&str>,
    ) -> Value {
        let vault = match self.resolve_vault(vault_id).await {
            Ok(vault) => vault,
            Err(error) => return error,
        };
        let search_mode = match search_mode.to_ascii_lowercase().as_str() {
            mode @ ("filename" | "content" | "both") => mode.to_string(),
            other => {
                tracing::info!("invalid search_mode '{other}', defaulting to 'both'");
                "both".to_string()
            }
        };
        let mut params = json!({
            "query": query,
            "searchMode": search_mode,
            "maxResults": max_results,
            "includeContext": include_context,
            "vaultId": vault,
        });
        if let Some(path) = path {
            params["path"] = json!(path);
        }
        self.forward(&vault, "file:search", params).await
    }

    async fn read_note(
        &self,
        path: &str,
        include_line_map: bool,
        vault_id: Option<&str>,
    ) -> Value {
        let vault = match self.resolve_vault(vault_id).await {
            Ok(vault) => vault,
            Err(error) => return error,
        };
        let params = json!({
            "path": path,
            "includeLineMap": include_line_map,
            "vaultId": vault,
        });
        self.forward(&vault, "file:read", params).await
    }

    async fn create_note(&self, path: &str, content: &str, vault_id: Option<&str>) -> Value {
        let vault = match self.resolve_vault(vault_id).await {
            Ok(vault) => vault,
            Err(error) => return error,
        };
        let params = json!({"path": path, "content": content, "vaultId": vault});
        self.forward(&vault, "file:create", params).await
    }

    async fn update_note(&self, request: UpdateNoteRequest) -> Value {
        let vault = match self.resolve_vault(request.vault_id.as_deref()).await {
            Ok(vault) => vault,
            Err(error) => return error,
        };

        let (operation, params) = match request.editing_mode.as_str() {
            "full_file" => {
                let Some(content) = request.content else {
                    return json!({
                        "success": false,
                        "error": "content parameter required for full_file mode",
                    });
                };
                (
                    "file:write",
                    json!({"path": request.path, "content": content, "vaultId": vault}),
                )
            }
            "frontmatter_only" => {
                let Some(changes) = request.frontmatter_changes else {
                    return json!({
                        "success": false,
                        "error": "frontmatter_changes parameter required for frontmatter_only mode",
                    });
                };
                (
                    "file:frontmatter_edit",
                    json!({
                        "path": request.path,
                        "vaultId": vault,
                        "frontmatterChanges": changes,
                    }),
                )
            }
            "append_only" => {
                let Some(append) = request.append_content else {
                    return json!({
                        "success": false,
                        "error": "append_content parameter required for append_only mode",
                    });
                };
                (
                    "file:append",
                    json!({"path": request.path, "vaultId": vault, "appendContent": append}),
                )
            }
            "range_based" => {
                let (Some(replacement), Some(start_line), Some(start_char)) = (
                    request.replacement_content,
                    request.range_start_line,
                    request.range_start_char,
                ) else {
                    return json!({
                        "success": false,
                        "error": "replacement_content, range_start_line, and range_start_char \
                                  parameters required for range_based mode",
                    });
                };
                let mut params = json!({
                    "path": request.path,
                    "vaultId": vault,
                    "replacementContent": replacement,
                    "rangeStartLine": start_line,
                    "rangeStartChar": start_char,
                });
                if let Some(end_line) = request.range_end_line {
                    params["rangeEndLine"] = json!(end_line);
                }
                if let Some(end_char) = request.range_end_char {
                    params["rangeEndChar"] = json!(end_char);
                }
                ("file:range_edit", params)
            }
            "editor_based" => {
                let Some(method) = request.editor_method else {
                    return json!({
                        "success": false,
                        "error": "editor_method parameter required for editor_based mode",
                    });
                };
                let mut params = json!({
                    "path": request.path,
                    "vaultId": vault,
                    "editorMethod": method,
                });
                // Any flavor of content collapses into one field.
                if let Some(content) = request
                    .content
                    .or(request.replacement_content)
                    .or(request.append_content)
                {
                    params["content"] = json!(content);
                }
                // Editor positions travel as strings; the editor parses them.
                if let Some(obj) = params.as_object_mut() {
                    for (key, value) in &request.extra {
                        let rendered = match value {
                            Value::String(s) => json!(s),
                            other => json!(other.to_string()),
                        };
                        obj.insert(key.clone(), rendered);
                    }
                }
                ("file:editor_edit", params)
            }
            other => {
                return json!({
                    "success": false,
                    "error": format!(
                        "Invalid editing_mode: {other}. Must be one of: full_file, \
                         frontmatter_only, append_only, range_based, editor_based"
                    ),
                });
            }
        };

        self.forward(&vault, operation, params).await
    }

    async fn list_vaults(&self) -> Value {
        let connected = self.link.connected_vaults().await;
        let Some(target) = connected.first() else {
            return failure(
                "No Obsidian clients are currently connected. Please restart Obsidian and \
                 ensure the MCP plugin is enabled and connected.",
                "NO_CLIENTS",
            );
        };
        // Any connected vault can enumerate vaults for us.
        self.forward(target, "vault:list", json!({})).await
    }

    async fn explore_folders(
        &self,
        path: Option<&str>,
        query: Option<&str>,
        format: &str,
        max_depth: u32,
        vault_id: Option<&str>,
    ) -> Value {
        let vault = match self.resolve_vault(vault_id).await {
            Ok(vault) => vault,
            Err(error) => return error,
        };

        let format = match format.to_ascii_lowercase().as_str() {
            f @ ("tree" | "flat" | "paths" | "smart") => f.to_string(),
            _ => "smart".to_string(),
        };
        let mut params = json!({
            "format": format,
            "maxDepth": max_depth,
            "vaultId": vault,
        });
        match (path, query) {
            (Some(path), _) if !path.is_empty() => params["path"] = json!(path),
            (_, Some(query)) if !query.is_empty() => params["query"] = json!(query),
            _ => params["path"] = json!("/"),
        }

        let response = self
            .link
            .request_file_operation(&vault, "folder:explore", params.clone(), EXPLORE_TIMEOUT)
            .await;
        let Some(response) = response else {
            return json!({"success": false, "error": "No response from vault", "vaultId": vault});
        };

        let payload = response.payload.unwrap_or_else(|| json!({}));
        let mut results = payload
            .get("results")
            .or_else(|| payload.get("folders"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if results.is_empty() {
            // Synthesize the root entry so callers always see something.
            results.push(json!({
                "path": params.get("path").cloned().unwrap_or_else(|| json!("/")),
                "name": "",
                "type": "folder",
            }));
        }
        let total = payload
            .get("totalFolders")
            .and_then(Value::as_u64)
            .unwrap_or(results.len() as u64);

        json!({
            "success": response.success,
            "results": results,
            "totalFolders": total,
            "formatUsed": format,
            "query": query,
            "path": path.map(Value::from).unwrap_or_else(|| params["path"].clone()),
            "vaultId": vault,
        })
    }

    async fn create_note_with_template(
        &self,
        request_type: &str,
        file_name: &str,
        content: &str,
        target_folder: &str,
        vault_id: Option<&str>,
    ) -> Value {
        let vault = match self.resolve_vault(vault_id).await {
            Ok(vault) => vault,
            Err(error) => return error,
        };

        // Phase 1: discover templates and folder mappings.
        let check = self
            .link
            .request_file_operation(&vault, "templater:check", json!({}), OPERATION_TIMEOUT)
            .await;
        let Some(check) = check else {
            return json!({"success": false, "error": "No response from vault for templater:check"});
        };
        if !check.success {
            return json!({
                "success": false,
                "error": "Templater check failed",
                "details": serde_json::to_value(&check).unwrap_or_default(),
            });
        }
        let check_payload = check.payload.unwrap_or_else(|| json!({}));
        let templates = check_payload
            .get("templates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let template_mappings = check_payload
            .get("templateMappings")
            .cloned()
            .unwrap_or_else(|| json!({}));

        // Exact name first, then a contains match either way round.
        let request_lower = request_type.to_lowercase();
        let mut matched_template: Option<String> = None;
        for template in &templates {
            let name = template
                .get("basename")
                .and_then(Value::as_str)
                .or_else(|| template.as_str());
            let Some(name) = name else { continue };
            if name == request_type {
                matched_template = Some(name.to_string());
                break;
            }
            let name_lower = name.to_lowercase();
            if !request_lower.is_empty()
                && (name_lower.contains(&request_lower) || request_lower.contains(&name_lower))
            {
                matched_template = Some(name.to_string());
            }
        }

        let mut resolved_folder = target_folder.trim().to_string();
        if resolved_folder.is_empty() {
            if let Some(matched) = &matched_template {
                if let Some(mapped) = template_mappings.get(matched).and_then(Value::as_str) {
                    resolved_folder = mapped.to_string();
                    tracing::info!(
                        "using mapped folder '{resolved_folder}' for template '{matched}'"
                    );
                }
            }
        }

        // Phase 2: create through the plugin; it fuzzy-matches and may ask
        // the caller to pick when several templates fit.
        let params = json!({
            "searchTerm": request_type,
            "fileName": file_name,
            "targetFolder": resolved_folder,
            "userContent": content,
            "templateMappings": template_mappings,
        });
        let create = self
            .link
            .request_file_operation(&vault, "file:create_with_template", params, OPERATION_TIMEOUT)
            .await;
        let Some(create) = create else {
            return json!({
                "success": false,
                "error": "No response from vault for file:create_with_template",
                "templateMappings": template_mappings,
            });
        };

        let create_payload = create.payload.clone().unwrap_or_else(|| json!({}));
        if create_payload
            .get("requiresSelection")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return json!({
                "success": false,
                "requiresSelection": true,
                "availableTemplates": create_payload.get("availableTemplates").cloned()
                    .unwrap_or_else(|| json!([])),
                "message": create.error.clone().unwrap_or_else(|| "Template selection required".to_string()),
                "templateMappings": template_mappings,
                "suggestedFolder": resolved_folder,
            });
        }
        if !create.success {
            return json!({
                "success": false,
                "error": "Vault failed to create file with template",
                "details": serde_json::to_value(&create).unwrap_or_default(),
                "templateMappings": template_mappings,
                "suggestedFolder": resolved_folder,
            });
        }

        json!({
            "success": true,
            "vaultId": vault,
            "path": create_payload.get("path").cloned().unwrap_or(Value::Null),
            "targetFolder": resolved_folder,
            "templateUsed": create_payload.get("templateUsed").cloned()
                .unwrap_or_else(|| matched_template.map(Value::from).unwrap_or(Value::Null)),
            "templateMappings": template_mappings,
            "payload": create_payload,
        })
    }

    async fn manage_note(
        &self,
        operation: &str,
        path: &str,
        new_path: Option<&str>,
        vault_id: Option<&str>,
    ) -> Value {
        let vault = match self.resolve_vault(vault_id).await {
            Ok(vault) => vault,
            Err(error) => return error,
        };
        match operation {
            "delete" => {
                self.forward(&vault, "file:delete", json!({"path": path, "vaultId": vault}))
                    .await
            }
            "rename" => {
                let Some(new_path) = new_path else {
                    return json!({
                        "success": false,
                        "error": "Missing required parameter 'newPath' for rename operation",
                    });
                };
                self.forward(
                    &vault,
                    "file:rename",
                    json!({"path": path, "newPath": new_path, "vaultId": vault}),
                )
                .await
            }
            other => json!({
                "success": false,
                "error": format!("Invalid operation '{other}'. Must be one of: delete, rename"),
            }),
        }
    }

    async fn manage_folder(
        &self,
        operation: &str,
        folder_path: &str,
        new_folder_path: Option<&str>,
        vault_id: Option<&str>,
    ) -> Value {
        let vault = match self.resolve_vault(vault_id).await {
            Ok(vault) => vault,
            Err(error) => return error,
        };
        match operation {
            "create" => {
                self.forward(
                    &vault,
                    "folder:create",
                    json!({"folderPath": folder_path, "vaultId": vault}),
                )
                .await
            }
            "rename" => {
                let Some(new_folder_path) = new_folder_path else {
                    return json!({
                        "success": false,
                        "error": "Missing required parameter 'newFolderPath' for rename operation",
                    });
                };
                self.forward(
                    &vault,
                    "folder:rename",
                    json!({"oldPath": folder_path, "newPath": new_folder_path, "vaultId": vault}),
                )
                .await
            }
            "delete" => {
                self.forward(
                    &vault,
                    "folder:delete",
                    json!({"path": folder_path, "vaultId": vault}),
                )
                .await
            }
            other => json!({
                "success": false,
                "error": format!("Invalid operation '{other}'. Must be one of: create, rename, delete"),
            }),
        }
    }
}
