//! Subprocess-backed vault operations.
//!
//! Stateless alternative to the WebSocket hub: every call spawns the editor's
//! CLI binary (`vault=<name> <command> key=value ...`), captures stdout, and
//! returns the same result envelopes as [`crate::HubBackend`]. Subprocesses
//! are driven asynchronously so tool dispatch never stalls on their I/O.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::backend::{UpdateNoteRequest, VaultBackend, failure};

const RUN_TIMEOUT: Duration = Duration::from_secs(30);
const EVAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Locate the editor CLI binary: platform candidates first, then PATH.
pub fn detect_cli_binary() -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if cfg!(target_os = "windows") {
        for var in ["LOCALAPPDATA", "APPDATA"] {
            if let Ok(base) = std::env::var(var) {
                candidates.push(Path::new(&base).join("Obsidian").join("Obsidian.com"));
            }
        }
    } else if cfg!(target_os = "macos") {
        candidates.push(PathBuf::from("/Applications/Obsidian.app/Contents/MacOS/Obsidian"));
    } else {
        candidates.push(PathBuf::from("/usr/local/bin/obsidian"));
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".local/bin/obsidian"));
        }
    }

    for candidate in candidates {
        if candidate.is_file() {
            tracing::info!("found editor CLI binary at {}", candidate.display());
            return Some(candidate);
        }
    }

    // Fallback: scan PATH for either binary name.
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        for name in ["obsidian", "Obsidian.com"] {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Encode literal newlines for single-argument CLI transport.
fn encode_newlines(text: &str) -> String {
    text.replace('\n', "\\n")
}

/// Append `.md` unless the path already ends with it. An `ends_with` check,
/// not a dot scan: note names like `Day45.01 - Plan` contain dots.
fn auto_md(path: &str) -> String {
    if path.to_lowercase().ends_with(".md") {
        path.to_string()
    } else {
        format!("{path}.md")
    }
}

pub struct CliBackend {
    binary: PathBuf,
    default_vault: Option<String>,
}

impl CliBackend {
    pub fn new(binary: PathBuf, default_vault: Option<String>) -> Self {
        CliBackend { binary, default_vault }
    }

    /// Auto-detect the binary; fails when the editor CLI is not installed.
    pub fn from_detected_binary(default_vault: Option<String>) -> Result<Self, String> {
        match detect_cli_binary() {
            Some(binary) => Ok(Self::new(binary, default_vault)),
            None => Err(
                "Editor CLI not found. Install the editor and enable its CLI integration."
                    .to_string(),
            ),
        }
    }

    fn resolve_vault(&self, vault_id: Option<&str>) -> Result<String, Value> {
        if let Some(vault_id) = vault_id {
            return Ok(vault_id.to_string());
        }
        match &self.default_vault {
            Some(vault) => Ok(vault.clone()),
            None => Err(failure(
                "No vault specified and no default vault set.",
                "NO_ACTIVE_VAULT",
            )),
        }
    }

    /// Run one vault-scoped CLI command. Returns `(stdout, exit_code)`.
    async fn run(&self, vault: &str, args: Vec<String>, timeout: Duration) -> Result<(String, i32), Value> {
        let mut command = tokio::process::Command::new(&self.binary);
        command.arg(format!("vault={vault}"));
        command.args(&args);
        command.stdin(std::process::Stdio::null());
        tracing::debug!("cli: {} vault={vault} {}", self.binary.display(), args.first().map(String::as_str).unwrap_or(""));

        let output = tokio::time::timeout(timeout, command.output()).await;
        match output {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout)
                    .replace("\r\n", "\n")
                    .trim()
                    .to_string();
                Ok((stdout, output.status.code().unwrap_or(-1)))
            }
            Ok(Err(err)) => Err(failure(format!("CLI spawn failed: {err}"), "CLI_ERROR")),
            Err(_) => Err(failure(
                format!("CLI command timed out after {}s", timeout.as_secs()),
                "CLI_TIMEOUT",
            )),
        }
    }

    /// Run a vault-agnostic command (`vaults`, `version`).
    async fn run_global(&self, args: Vec<String>) -> Result<(String, i32), Value> {
        let mut command = tokio::process::Command::new(&self.binary);
        command.args(&args);
        command.stdin(std::process::Stdio::null());
        let output = tokio::time::timeout(Duration::from_secs(15), command.output()).await;
        match output {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout)
                    .replace("\r\n", "\n")
                    .trim()
                    .to_string();
                Ok((stdout, output.status.code().unwrap_or(-1)))
            }
            Ok(Err(err)) => Err(failure(format!("CLI spawn failed: {err}"), "CLI_ERROR")),
            Err(_) => Err(failure("CLI command timed out", "CLI_TIMEOUT")),
        }
    }

    fn is_error(stdout: &str, code: i32) -> bool {
        code != 0 || stdout.starts_with("Error:")
    }

    fn ok(payload: Value) -> Value {
        json!({"success": true, "payload": payload, "error": null})
    }

    async fn read_raw(&self, vault: &str, path: &str) -> Result<String, Value> {
        let (out, code) = self
            .run(vault, vec!["read".to_string(), format!("path={}", auto_md(path))], RUN_TIMEOUT)
            .await?;
        if Self::is_error(&out, code) {
            return Err(failure(
                if out.is_empty() { format!("Note not found: {path}") } else { out },
                "NOT_FOUND",
            ));
        }
        Ok(out)
    }

    async fn write_full(&self, vault: &str, path: &str, content: &str) -> Value {
        let args = vec![
            "create".to_string(),
            format!("path={}", auto_md(path)),
            format!("content={}", encode_newlines(content)),
            "overwrite".to_string(),
        ];
        match self.run(vault, args, RUN_TIMEOUT).await {
            Ok((out, code)) if !Self::is_error(&out, code) => {
                Self::ok(json!({"path": auto_md(path)}))
            }
            Ok((out, _)) => failure(if out.is_empty() { "Write failed".to_string() } else { out }, "CLI_ERROR"),
            Err(error) => error,
        }
    }
}

/// Line map plus the frontmatter/body sections derived from the first two
/// `---` delimiters. Shared with the line-mapped read tool contract.
pub fn line_map_metadata(content: &str) -> Value {
    let lines: Vec<&str> = content.lines().collect();
    let mut line_map = Map::new();
    for (index, line) in lines.iter().enumerate() {
        line_map.insert((index + 1).to_string(), json!(line));
    }

    let mut sections = Vec::new();
    let total = lines.len();
    if total > 0 && lines[0] == "---" {
        if let Some(close) = lines.iter().skip(1).position(|l| *l == "---") {
            let close_line = close + 2;
            sections.push(json!({"name": "frontmatter", "startLine": 1, "endLine": close_line}));
            if close_line < total {
                sections.push(json!({"name": "body", "startLine": close_line + 1, "endLine": total}));
            }
        }
    }
    if sections.is_empty() && total > 0 {
        sections.push(json!({"name": "body", "startLine": 1, "endLine": total}));
    }

    json!({
        "totalLines": total,
        "lineMap": line_map,
        "sections": sections,
    })
}

/// Apply a range replacement to `content` (1-based lines, 0-based chars).
pub fn apply_range_edit(
    content: &str,
    replacement: &str,
    start_line: i64,
    start_char: i64,
    end_line: Option<i64>,
    end_char: Option<i64>,
) -> Result<String, String> {
    let lines: Vec<&str> = content.split('\n').collect();
    let start_line = usize::try_from(start_line.max(1)).map_err(|_| "bad start line")? - 1;
    if start_line >= lines.len() {
        return Err(format!("range_start_line {} beyond end of file", start_line + 1));
    }
    let end_line = end_line
        .map(|l| usize::try_from(l.max(1)).map_err(|_| "bad end line".to_string()))
        .transpose()?
        .map(|l| l - 1)
        .unwrap_or(start_line)
        .min(lines.len() - 1);

    let start_char = (start_char.max(0) as usize).min(lines[start_line].len());
    let end_char = end_char
        .map(|c| c.max(0) as usize)
        .unwrap_or(lines[end_line].len())
        .min(lines[end_line].len());

    let mut result: Vec<String> = lines[..start_line].iter().map(|s| s.to_string()).collect();
    let patched = format!(
        "{}{}{}",
        &lines[start_line][..start_char],
        replacement,
        &lines[end_line][end_char..]
    );
    result.extend(patched.split('\n').map(str::to_string));
    result.extend(lines[end_line + 1..].iter().map(|s| s.to_string()));
    Ok(result.join("\n"))
}

#[async_trait]
impl VaultBackend for CliBackend {
    async fn search_notes(
        &self,
        query: &str,
        search_mode: &str,
        max_results: u32,
        include_context: bool,
        path: Option<&str>,
        vault_id: Option<&str>,
    ) -> Value {
        let vault = match self.resolve_vault(vault_id) {
            Ok(vault) => vault,
            Err(error) => return error,
        };

        if search_mode == "filename" {
            // File listing plus a client-side substring filter.
            let (out, code) = match self
                .run(&vault, vec!["files".to_string(), "format=json".to_string()], RUN_TIMEOUT)
                .await
            {
                Ok(pair) => pair,
                Err(error) => return error,
            };
            if Self::is_error(&out, code) {
                return failure(if out.is_empty() { "File listing failed".to_string() } else { out }, "CLI_ERROR");
            }
            let needle = query.to_lowercase();
            let files: Vec<Value> = serde_json::from_str::<Vec<Value>>(&out)
                .unwrap_or_else(|_| out.lines().map(|l| json!(l)).collect());
            let matches: Vec<Value> = files
                .into_iter()
                .filter_map(|entry| {
                    let file_path = entry.as_str().map(str::to_string).or_else(|| {
                        entry.get("path").and_then(Value::as_str).map(str::to_string)
                    })?;
                    file_path
                        .to_lowercase()
                        .contains(&needle)
                        .then(|| json!({"path": file_path, "matchType": "filename"}))
                })
                .take(max_results as usize)
                .collect();
            return Self::ok(json!({"results": matches, "query": query, "searchMode": "filename"}));
        }

        let mut args = vec![
            "search:context".to_string(),
            format!("query={query}"),
            format!("limit={max_results}"),
            "format=json".to_string(),
        ];
        if let Some(path) = path {
            args.push(format!("path={path}"));
        }
        let (out, code) = match self.run(&vault, args, RUN_TIMEOUT).await {
            Ok(pair) => pair,
            Err(error) => return error,
        };
        if Self::is_error(&out, code) {
            return failure(if out.is_empty() { "Search failed".to_string() } else { out }, "CLI_ERROR");
        }
        let mut results: Vec<Value> =
            serde_json::from_str(&out).unwrap_or_else(|_| Vec::new());
        if !include_context {
            for entry in &mut results {
                if let Some(obj) = entry.as_object_mut() {
                    obj.remove("context");
                }
            }
        }
        Self::ok(json!({"results": results, "query": query, "searchMode": search_mode}))
    }

    async fn read_note(
        &self,
        path: &str,
        include_line_map: bool,
        vault_id: Option<&str>,
    ) -> Value {
        let vault = match self.resolve_vault(vault_id) {
            Ok(vault) => vault,
            Err(error) => return error,
        };
        let content = match self.read_raw(&vault, path).await {
            Ok(content) => content,
            Err(error) => return error,
        };
        let mut payload = json!({"path": auto_md(path), "content": content});
        if include_line_map {
            payload["metadata"] = line_map_metadata(&content);
        }
        Self::ok(payload)
    }

    async fn create_note(&self, path: &str, content: &str, vault_id: Option<&str>) -> Value {
        let vault = match self.resolve_vault(vault_id) {
            Ok(vault) => vault,
            Err(error) => return error,
        };
        self.write_full(&vault, path, content).await
    }

    async fn update_note(&self, request: UpdateNoteRequest) -> Value {
        let vault = match self.resolve_vault(request.vault_id.as_deref()) {
            Ok(vault) => vault,
            Err(error) => return error,
        };

        match request.editing_mode.as_str() {
            "full_file" => {
                let Some(content) = request.content else {
                    return json!({"success": false, "error": "content parameter required for full_file mode"});
                };
                self.write_full(&vault, &request.path, &content).await
            }
            "append_only" => {
                let Some(append) = request.append_content else {
                    return json!({"success": false, "error": "append_content parameter required for append_only mode"});
                };
                let args = vec![
                    "append".to_string(),
                    format!("path={}", auto_md(&request.path)),
                    format!("content={}", encode_newlines(&append)),
                ];
                match self.run(&vault, args, RUN_TIMEOUT).await {
                    Ok((out, code)) if !Self::is_error(&out, code) => {
                        Self::ok(json!({"path": auto_md(&request.path)}))
                    }
                    Ok((out, _)) => failure(out, "CLI_ERROR"),
                    Err(error) => error,
                }
            }
            "frontmatter_only" => {
                let Some(changes) = request.frontmatter_changes else {
                    return json!({"success": false, "error": "frontmatter_changes parameter required for frontmatter_only mode"});
                };
                // One property:set per key.
                for (name, value) in &changes {
                    let rendered = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    let args = vec![
                        "property:set".to_string(),
                        format!("name={name}"),
                        format!("value={rendered}"),
                        format!("path={}", auto_md(&request.path)),
                    ];
                    match self.run(&vault, args, RUN_TIMEOUT).await {
                        Ok((out, code)) if Self::is_error(&out, code) => {
                            return failure(
                                format!("Failed to set property '{name}': {out}"),
                                "CLI_ERROR",
                            );
                        }
                        Ok(_) => {}
                        Err(error) => return error,
                    }
                }
                Self::ok(json!({"path": auto_md(&request.path), "updated": changes.len()}))
            }
            "range_based" => {
                let (Some(replacement), Some(start_line), Some(start_char)) = (
                    request.replacement_content.clone(),
                    request.range_start_line,
                    request.range_start_char,
                ) else {
                    return json!({
                        "success": false,
                        "error": "replacement_content, range_start_line, and range_start_char \
                                  parameters required for range_based mode",
                    });
                };
                let content = match self.read_raw(&vault, &request.path).await {
                    Ok(content) => content,
                    Err(error) => return error,
                };
                match apply_range_edit(
                    &content,
                    &replacement,
                    start_line,
                    start_char,
                    request.range_end_line,
                    request.range_end_char,
                ) {
                    Ok(patched) => self.write_full(&vault, &request.path, &patched).await,
                    Err(err) => failure(err, "RANGE_ERROR"),
                }
            }
            "editor_based" => {
                // No live editor behind a subprocess; the hub backend owns
                // this mode.
                json!({
                    "success": false,
                    "error": "editor_based mode requires a connected editor (WebSocket backend)",
                    "error_code": "UNSUPPORTED_MODE",
                })
            }
            other => json!({
                "success": false,
                "error": format!(
                    "Invalid editing_mode: {other}. Must be one of: full_file, \
                     frontmatter_only, append_only, range_based, editor_based"
                ),
            }),
        }
    }

    async fn list_vaults(&self) -> Value {
        let (out, code) = match self
            .run_global(vec!["vaults".to_string(), "format=json".to_string()])
            .await
        {
            Ok(pair) => pair,
            Err(error) => return error,
        };
        if Self::is_error(&out, code) {
            return failure(if out.is_empty() { "Vault listing failed".to_string() } else { out }, "CLI_ERROR");
        }
        let vaults: Vec<Value> = serde_json::from_str(&out)
            .unwrap_or_else(|_| out.lines().filter(|l| !l.is_empty()).map(|l| json!(l)).collect());
        Self::ok(json!({"vaults": vaults}))
    }

    async fn explore_folders(
        &self,
        path: Option<&str>,
        _query: Option<&str>,
        format: &str,
        max_depth: u32,
        vault_id: Option<&str>,
    ) -> Value {
        let vault = match self.resolve_vault(vault_id) {
            Ok(vault) => vault,
            Err(error) => return error,
        };
        let mut args = vec!["folders".to_string(), "format=json".to_string()];
        if let Some(path) = path {
            args.push(format!("path={path}"));
        }
        let (out, code) = match self.run(&vault, args, RUN_TIMEOUT).await {
            Ok(pair) => pair,
            Err(error) => return error,
        };
        if Self::is_error(&out, code) {
            return failure(if out.is_empty() { "Folder listing failed".to_string() } else { out }, "CLI_ERROR");
        }
        let folders: Vec<String> = serde_json::from_str(&out)
            .unwrap_or_else(|_| out.lines().filter(|l| !l.is_empty()).map(str::to_string).collect());
        let results: Vec<Value> = folders
            .into_iter()
            .filter(|folder| {
                folder.split('/').filter(|part| !part.is_empty()).count() <= max_depth as usize
            })
            .map(|folder| {
                let name = folder.rsplit('/').next().unwrap_or(&folder).to_string();
                json!({"path": folder, "name": name, "type": "folder"})
            })
            .collect();
        let total = results.len();
        json!({
            "success": true,
            "results": results,
            "totalFolders": total,
            "formatUsed": format,
            "path": path,
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
        let vault = match self.resolve_vault(vault_id) {
            Ok(vault) => vault,
            Err(error) => return error,
        };

        // Non-interactive Templater invocation through the CLI's eval.
        let file_path = if target_folder.is_empty() {
            auto_md(file_name)
        } else {
            format!("{}/{}", target_folder.trim_end_matches('/'), auto_md(file_name))
        };
        let js = format!(
            "const tp = app.plugins.plugins['templater-obsidian'];\
             await tp.templater.create_new_note_from_template(\
                 tp.templater.get_template_file({request_type:?}), \
                 {target_folder:?}, {file_name:?});"
        );
        let args = vec!["eval".to_string(), format!("code={js}")];
        match self.run(&vault, args, EVAL_TIMEOUT).await {
            Ok((out, code)) if !Self::is_error(&out, code) => {
                if !content.is_empty() {
                    let append = vec![
                        "append".to_string(),
                        format!("path={file_path}"),
                        format!("content={}", encode_newlines(content)),
                    ];
                    if let Err(error) = self.run(&vault, append, RUN_TIMEOUT).await {
                        return error;
                    }
                }
                Self::ok(json!({
                    "path": file_path,
                    "templateUsed": request_type,
                    "targetFolder": target_folder,
                }))
            }
            Ok((out, _)) => failure(
                if out.is_empty() { "Template creation failed".to_string() } else { out },
                "TEMPLATE_ERROR",
            ),
            Err(error) => error,
        }
    }

    async fn manage_note(
        &self,
        operation: &str,
        path: &str,
        new_path: Option<&str>,
        vault_id: Option<&str>,
    ) -> Value {
        let vault = match self.resolve_vault(vault_id) {
            Ok(vault) => vault,
            Err(error) => return error,
        };
        let args = match operation {
            "delete" => vec!["delete".to_string(), format!("path={}", auto_md(path))],
            "rename" => {
                let Some(new_path) = new_path else {
                    return json!({
                        "success": false,
                        "error": "Missing required parameter 'newPath' for rename operation",
                    });
                };
                vec![
                    "move".to_string(),
                    format!("path={}", auto_md(path)),
                    format!("to={}", auto_md(new_path)),
                ]
            }
            other => {
                return json!({
                    "success": false,
                    "error": format!("Invalid operation '{other}'. Must be one of: delete, rename"),
                });
            }
        };
        match self.run(&vault, args, RUN_TIMEOUT).await {
            Ok((out, code)) if !Self::is_error(&out, code) => {
                Self::ok(json!({"path": auto_md(path), "operation": operation}))
            }
            Ok((out, _)) => failure(out, "CLI_ERROR"),
            Err(error) => error,
        }
    }

    async fn manage_folder(
        &self,
        operation: &str,
        folder_path: &str,
        new_folder_path: Option<&str>,
        vault_id: Option<&str>,
    ) -> Value {
        let vault = match self.resolve_vault(vault_id) {
            Ok(vault) => vault,
            Err(error) => return error,
        };
        let args = match operation {
            "create" => vec!["mkdir".to_string(), format!("path={folder_path}")],
            "rename" => {
                let Some(new_folder_path) = new_folder_path else {
                    return json!({
                        "success": false,
                        "error": "Missing required parameter 'newFolderPath' for rename operation",
                    });
                };
                vec![
                    "move".to_string(),
                    format!("path={folder_path}"),
                    format!("to={new_folder_path}"),
                ]
            }
            "delete" => vec!["trash".to_string(), format!("path={folder_path}")],
            other => {
                return json!({
                    "success": false,
                    "error": format!(
                        "Invalid operation '{other}'. Must be one of: create, rename, delete"
                    ),
                });
            }
        };
        match self.run(&vault, args, RUN_TIMEOUT).await {
            Ok((out, code)) if !Self::is_error(&out, code) => {
                Self::ok(json!({"folderPath": folder_path, "operation": operation}))
            }
            Ok((out, _)) => failure(out, "CLI_ERROR"),
            Err(error) => error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_md_only_appends_when_missing() {
        assert_eq!(auto_md("note"), "note.md");
        assert_eq!(auto_md("note.md"), "note.md");
        assert_eq!(auto_md("Day45.01 - Plan"), "Day45.01 - Plan.md");
    }

    #[test]
    fn line_map_detects_frontmatter_and_body() {
        let metadata = line_map_metadata("---\ntitle: X\n---\nbody line");
        assert_eq!(metadata["totalLines"], 4);
        assert_eq!(metadata["lineMap"]["1"], "---");
        assert_eq!(metadata["lineMap"]["4"], "body line");
        assert_eq!(metadata["sections"][0]["name"], "frontmatter");
        assert_eq!(metadata["sections"][0]["startLine"], 1);
        assert_eq!(metadata["sections"][0]["endLine"], 3);
        assert_eq!(metadata["sections"][1]["name"], "body");
        assert_eq!(metadata["sections"][1]["startLine"], 4);
    }

    #[test]
    fn line_map_without_frontmatter_is_all_body() {
        let metadata = line_map_metadata("just\ntwo lines");
        assert_eq!(metadata["sections"][0]["name"], "body");
        assert_eq!(metadata["sections"][0]["endLine"], 2);
    }

    #[test]
    fn range_edit_replaces_within_one_line() {
        let patched = apply_range_edit("hello world", "there", 1, 6, None, None).unwrap();
        assert_eq!(patched, "hello there");
    }

    #[test]
    fn range_edit_spans_lines() {
        let patched = apply_range_edit("one\ntwo\nthree", "2", 2, 0, Some(2), None).unwrap();
        assert_eq!(patched, "one\n2\nthree");
    }

    #[test]
    fn range_edit_rejects_out_of_bounds() {
        assert!(apply_range_edit("one", "x", 9, 0, None, None).is_err());
    }

    #[tokio::test]
    async fn missing_default_vault_is_no_active_vault() {
        let backend = CliBackend::new(PathBuf::from("/nonexistent"), None);
        let result = backend.read_note("x.md", false, None).await;
        assert_eq!(result["error_code"], "NO_ACTIVE_VAULT");
    }

    #[tokio::test]
    async fn editor_based_mode_is_unsupported() {
        let backend = CliBackend::new(PathBuf::from("/nonexistent"), Some("V".to_string()));
        let result = backend
            .update_note(UpdateNoteRequest {
                path: "x.md".to_string(),
                editing_mode: "editor_based".to_string(),
                editor_method: Some("insertAtLine".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(result["error_code"], "UNSUPPORTED_MODE");
    }
}
