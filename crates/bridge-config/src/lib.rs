//! Bridge configuration.
//!
//! The editor plugin hands us one JSON blob per run. Older plugin builds emit
//! camelCase keys, newer ones snake_case, so every lookup accepts both and
//! takes the first key present. The parsed [`BridgeConfig`] is immutable and
//! shared read-only by every component of a run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

mod keys;

pub use keys::pick;

pub const DEFAULT_WS_PORT: u16 = 41484;

/// One folder → group mapping from the plugin settings.
///
/// `folder_path` is vault-relative. `saga_grouping` and `saga_property_key`
/// control timeline chaining for notes under this folder;
/// `custom_extraction_instructions` override the vault-level instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderMapping {
    pub folder_path: String,
    pub group_id: String,
    pub saga_grouping: Option<String>,
    pub saga_property_key: Option<String>,
    pub custom_extraction_instructions: Option<String>,
}

/// Configuration container for one bridge run.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    // LLM
    pub llm_provider: String,
    pub llm_model: String,
    pub llm_small_model: Option<String>,

    // Cross-encoder (reranker)
    pub cross_encoder_client: Option<String>,
    pub cross_encoder_model: Option<String>,

    // Embedder
    pub embedder_provider: String,
    pub embedding_model: String,

    // Database
    pub database_type: String,
    pub database_url: String,
    pub database_username: Option<String>,
    pub database_password: Option<String>,
    pub database_name: String,

    // Processing
    pub notes: Vec<String>,
    pub models_path: Option<PathBuf>,
    pub vault_path: Option<PathBuf>,

    // Credentials: per-provider bag plus the legacy single-key fields
    pub api_keys: Option<BTreeMap<String, String>>,
    pub llm_api_key: Option<String>,
    pub embedder_api_key: Option<String>,

    // Provider-specific settings
    pub azure_endpoint: Option<String>,
    pub azure_api_version: Option<String>,
    pub ollama_base_url: Option<String>,

    // Tunables
    pub batch_size: u32,
    pub max_retries: u32,
    pub timeout: u32,
    pub debug: bool,

    // Episode & ontology
    pub use_custom_ontology: bool,
    pub default_namespace: String,
    pub enable_folder_namespacing: bool,
    pub enable_property_namespacing: bool,
    pub namespace_strategy: String,
    pub folder_namespace_mappings: Vec<FolderMapping>,
    pub available_namespaces: Vec<String>,
    pub global_extraction_instructions: Option<String>,

    pub source_description: Option<String>,
    /// Explicit namespace override from the editor side; wins over resolution.
    pub group_id: Option<String>,
    /// Episode UUIDs this episode should chain to, forwarded verbatim.
    pub previous_episode_uuids: Vec<String>,

    // Hub
    pub ws_port: u16,
    pub ws_auth_token: String,

    /// Use the editor's CLI subprocess backend for vault tools instead of
    /// the WebSocket hub.
    pub use_cli_file_tools: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("configuration must be a JSON object")]
    NotAnObject,
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeConfig {
    /// Parse a configuration blob.
    ///
    /// Accepts a JSON object in either key convention. A double-encoded blob
    /// (a JSON string containing JSON) is unwrapped once before parsing.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let value = match value {
            Value::String(inner) => serde_json::from_str(&inner)?,
            other => other,
        };
        let map = value.as_object().ok_or(ConfigError::NotAnObject)?;
        Ok(Self::from_map(map))
    }

    /// Load from a JSON file (`MCP_CONFIG_PATH` points here).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        Self::from_json(&bytes)
    }

    /// Build from an already-parsed JSON object.
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let default_namespace = pick(map, "default_namespace", "defaultNamespace")
            .and_then(Value::as_str)
            .unwrap_or("vault")
            .to_string();

        BridgeConfig {
            llm_provider: str_or(map, "llm_provider", "llmProvider", "openai"),
            llm_model: str_or(map, "llm_model", "llmModel", "gpt-4o"),
            llm_small_model: opt_str(map, "llm_small_model", "llmSmallModel"),

            cross_encoder_client: opt_str(map, "cross_encoder_client", "crossEncoderClient"),
            cross_encoder_model: opt_str(map, "cross_encoder_model", "crossEncoderModel"),

            embedder_provider: str_or(map, "embedder_provider", "embedderProvider", "openai"),
            embedding_model: str_or(
                map,
                "embedding_model",
                "embeddingModel",
                "text-embedding-3-small",
            ),

            database_type: str_or(map, "database_type", "databaseType", "neo4j"),
            database_url: resolve_database_url(map),
            database_username: database_field(map, "database_username", "databaseUsername", "neo4j"),
            database_password: database_field(map, "database_password", "databasePassword", ""),
            database_name: str_or(map, "database_name", "databaseName", "neo4j"),

            notes: string_list(map.get("notes")),
            models_path: opt_str(map, "models_path", "modelsPath").map(|p| expand_tilde(&p)),
            vault_path: opt_str(map, "vault_path", "vaultPath").map(|p| expand_tilde(&p)),

            api_keys: map.get("api_keys").or_else(|| map.get("apiKeys")).and_then(|v| {
                v.as_object().map(|o| {
                    o.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
            }),
            llm_api_key: opt_str(map, "llm_api_key", "llmApiKey").filter(|s| !s.is_empty()),
            embedder_api_key: opt_str(map, "embedder_api_key", "embedderApiKey")
                .filter(|s| !s.is_empty()),

            azure_endpoint: opt_str(map, "azure_endpoint", "azureEndpoint"),
            azure_api_version: opt_str(map, "azure_api_version", "azureApiVersion"),
            ollama_base_url: opt_str(map, "ollama_base_url", "ollamaBaseUrl"),

            batch_size: uint_or(map, "batch_size", "batchSize", 10),
            max_retries: uint_or(map, "max_retries", "maxRetries", 3),
            timeout: uint_or(map, "timeout", "timeout", 30),
            debug: bool_or(map, "debug", "debugMode"),

            use_custom_ontology: bool_or(map, "use_custom_ontology", "useCustomOntology"),
            enable_folder_namespacing: bool_or(
                map,
                "enable_folder_namespacing",
                "enableFolderNamespacing",
            ),
            enable_property_namespacing: bool_or(
                map,
                "enable_property_namespacing",
                "enablePropertyNamespacing",
            ),
            namespace_strategy: str_or(map, "namespace_strategy", "namespaceStrategy", "vault"),
            folder_namespace_mappings: folder_mappings(
                pick(map, "folder_namespace_mappings", "folderNamespaceMappings"),
            ),
            available_namespaces: string_list(
                pick(map, "available_namespaces", "availableNamespaces"),
            ),
            global_extraction_instructions: opt_str(
                map,
                "global_extraction_instructions",
                "globalExtractionInstructions",
            ),

            source_description: opt_str(map, "source_description", "sourceDescription"),
            group_id: opt_str(map, "group_id", "groupId"),
            previous_episode_uuids: string_list(
                pick(map, "previous_episode_uuids", "previousEpisodeUuids"),
            ),

            ws_port: uint_or(map, "ws_port", "wsPort", u32::from(DEFAULT_WS_PORT)) as u16,
            ws_auth_token: str_or(map, "ws_auth_token", "wsAuthToken", ""),
            use_cli_file_tools: bool_or(map, "use_cli_file_tools", "useCliFileTools"),

            default_namespace,
        }
    }

    /// Validate and return the list of violations. Never panics, never raises;
    /// an empty list means the configuration is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // Ollama runs locally and needs no key.
        if self.llm_provider != "ollama" && self.effective_llm_api_key().is_empty() {
            errors.push("LLM API key is required".to_string());
        }
        if self.llm_model.is_empty() {
            errors.push("LLM model is required".to_string());
        }
        if self.embedding_model.is_empty() {
            errors.push("Embedding model is required".to_string());
        }
        if self.database_url.is_empty() {
            errors.push("Database URL is required".to_string());
        }
        if self.database_type == "neo4j"
            && self.database_password.as_deref().unwrap_or("").is_empty()
        {
            errors.push("Database password is required for Neo4j".to_string());
        }
        if self.models_path.is_none() && self.vault_path.is_none() {
            errors.push("Either models_path (static) or vault_path (dynamic) is required".to_string());
        }
        if self.notes.is_empty() {
            errors.push("At least one note is required".to_string());
        }

        if self.llm_provider == "azure" {
            if self.azure_endpoint.is_none() {
                errors.push("Azure endpoint is required for Azure provider".to_string());
            }
            if self.azure_api_version.is_none() {
                errors.push("Azure API version is required for Azure provider".to_string());
            }
        }
        if self.llm_provider == "ollama" && self.ollama_base_url.is_none() {
            errors.push("Ollama base URL is required for Ollama provider".to_string());
        }

        if let Some(models_path) = &self.models_path {
            if !models_path.exists() {
                errors.push(format!("Models path does not exist: {}", models_path.display()));
            }
        }
        if let Some(vault_path) = &self.vault_path {
            if !vault_path.exists() {
                errors.push(format!("Vault path does not exist: {}", vault_path.display()));
            }
        }

        let vault_base = self
            .vault_path
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
        for note in &self.notes {
            let direct = Path::new(note);
            if !direct.exists() && !vault_base.join(note).exists() {
                errors.push(format!("Note file does not exist: {note}"));
            }
        }

        errors
    }

    /// API key for the LLM provider: the per-provider bag wins, then the
    /// legacy single-key field.
    pub fn effective_llm_api_key(&self) -> String {
        if let Some(keys) = &self.api_keys {
            if let Some(key) = keys.get(&self.llm_provider) {
                return key.clone();
            }
        }
        self.llm_api_key.clone().unwrap_or_default()
    }

    /// API key for the embedder; falls back to the LLM key when no dedicated
    /// embedder credential exists.
    pub fn effective_embedder_api_key(&self) -> String {
        if let Some(keys) = &self.api_keys {
            if let Some(key) = keys.get(&self.embedder_provider) {
                return key.clone();
            }
        }
        self.embedder_api_key
            .clone()
            .unwrap_or_else(|| self.effective_llm_api_key())
    }

    /// Render for logging with every secret replaced and the note list
    /// summarized. This is the only form that may reach a log line.
    pub fn redacted(&self) -> Value {
        let api_keys = self.api_keys.as_ref().map(|keys| {
            keys.keys()
                .map(|provider| (provider.clone(), Value::from("REDACTED")))
                .collect::<Map<String, Value>>()
        });
        json!({
            "llm_provider": self.llm_provider,
            "llm_model": self.llm_model,
            "llm_small_model": self.llm_small_model,
            "cross_encoder_client": self.cross_encoder_client,
            "cross_encoder_model": self.cross_encoder_model,
            "embedder_provider": self.embedder_provider,
            "embedding_model": self.embedding_model,
            "database_type": self.database_type,
            "database_url": self.database_url,
            "database_username": self.database_username,
            "database_password": self.database_password.as_ref().map(|_| "REDACTED"),
            "database_name": self.database_name,
            "notes": format!("[{} notes]", self.notes.len()),
            "models_path": self.models_path,
            "vault_path": self.vault_path,
            "api_keys": api_keys,
            "llm_api_key": self.llm_api_key.as_ref().map(|_| "REDACTED"),
            "embedder_api_key": self.embedder_api_key.as_ref().map(|_| "REDACTED"),
            "azure_endpoint": self.azure_endpoint,
            "ollama_base_url": self.ollama_base_url,
            "use_custom_ontology": self.use_custom_ontology,
            "default_namespace": self.default_namespace,
            "namespace_strategy": self.namespace_strategy,
            "enable_folder_namespacing": self.enable_folder_namespacing,
            "enable_property_namespacing": self.enable_property_namespacing,
            "group_id": self.group_id,
            "ws_port": self.ws_port,
            "ws_auth_token": if self.ws_auth_token.is_empty() { Value::Null } else { Value::from("REDACTED") },
            "debug": self.debug,
        })
    }
}

/// Database URL priority: explicit url > typed sub-config > kind default.
fn resolve_database_url(map: &Map<String, Value>) -> String {
    if let Some(url) = pick(map, "database_url", "databaseUrl").and_then(Value::as_str) {
        if !url.is_empty() {
            return url.to_string();
        }
    }

    let database_type = pick(map, "database_type", "databaseType")
        .and_then(Value::as_str)
        .unwrap_or("neo4j");
    let configs = map
        .get("databaseConfigs")
        .or_else(|| map.get("database_configs"))
        .and_then(Value::as_object);

    if let Some(configs) = configs {
        match database_type {
            "neo4j" => {
                if let Some(uri) = configs
                    .get("neo4j")
                    .and_then(|c| c.get("uri"))
                    .and_then(Value::as_str)
                {
                    return uri.to_string();
                }
            }
            "falkordb" => {
                if let Some(falkor) = configs.get("falkordb").and_then(Value::as_object) {
                    let host = falkor.get("host").and_then(Value::as_str).unwrap_or("localhost");
                    let port = falkor.get("port").and_then(Value::as_u64).unwrap_or(6379);
                    return format!("falkor://{host}:{port}");
                }
            }
            _ => {}
        }
    }

    if database_type == "falkordb" {
        "falkor://localhost:6379".to_string()
    } else {
        "bolt://localhost:7687".to_string()
    }
}

/// FalkorDB supports unauthenticated connections, so an explicit JSON `null`
/// stays `None` while an empty string falls back to the Neo4j default.
fn database_field(
    map: &Map<String, Value>,
    snake: &str,
    camel: &str,
    default: &str,
) -> Option<String> {
    for key in [snake, camel] {
        if let Some(value) = map.get(key) {
            return match value {
                Value::Null => None,
                Value::String(s) if s.is_empty() => Some(default.to_string()),
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            };
        }
    }
    Some(default.to_string())
}

fn folder_mappings(value: Option<&Value>) -> Vec<FolderMapping> {
    let Some(Value::Array(entries)) = value else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|entry| {
            let folder_path = pick(entry, "folder_path", "folderPath")?.as_str()?.to_string();
            let group_id = pick(entry, "group_id", "groupId")?.as_str()?.to_string();
            Some(FolderMapping {
                folder_path,
                group_id,
                saga_grouping: opt_str(entry, "saga_grouping", "sagaGrouping"),
                saga_property_key: opt_str(entry, "saga_property_key", "sagaPropertyKey"),
                custom_extraction_instructions: opt_str(
                    entry,
                    "custom_extraction_instructions",
                    "customExtractionInstructions",
                ),
            })
        })
        .collect()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn str_or(map: &Map<String, Value>, snake: &str, camel: &str, default: &str) -> String {
    pick(map, snake, camel)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn opt_str(map: &Map<String, Value>, snake: &str, camel: &str) -> Option<String> {
    pick(map, snake, camel)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn uint_or(map: &Map<String, Value>, snake: &str, camel: &str, default: u32) -> u32 {
    pick(map, snake, camel)
        .and_then(Value::as_u64)
        .map(|n| n as u32)
        .unwrap_or(default)
}

fn bool_or(map: &Map<String, Value>, snake: &str, camel: &str) -> bool {
    pick(map, snake, camel).and_then(Value::as_bool).unwrap_or(false)
}

/// Expand a `~` or `~/` prefix to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> BridgeConfig {
        BridgeConfig::from_json(json.as_bytes()).unwrap()
    }

    #[test]
    fn accepts_both_key_conventions() {
        let snake = parse(r#"{"llm_provider": "anthropic", "llm_model": "claude"}"#);
        let camel = parse(r#"{"llmProvider": "anthropic", "llmModel": "claude"}"#);
        assert_eq!(snake.llm_provider, camel.llm_provider);
        assert_eq!(snake.llm_model, camel.llm_model);
    }

    #[test]
    fn snake_case_wins_when_both_present() {
        let config = parse(r#"{"llm_model": "a", "llmModel": "b"}"#);
        assert_eq!(config.llm_model, "a");
    }

    #[test]
    fn unwraps_double_encoded_blob() {
        let inner = r#"{"llmModel": "claude"}"#;
        let outer = serde_json::to_vec(&inner).unwrap();
        let config = BridgeConfig::from_json(&outer).unwrap();
        assert_eq!(config.llm_model, "claude");
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(
            BridgeConfig::from_json(b"not json"),
            Err(ConfigError::InvalidJson(_))
        ));
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(matches!(
            BridgeConfig::from_json(b"[1, 2]"),
            Err(ConfigError::NotAnObject)
        ));
    }

    #[test]
    fn database_url_prefers_explicit() {
        let config = parse(
            r#"{"databaseUrl": "bolt://db:7687",
                "databaseConfigs": {"neo4j": {"uri": "bolt://other:7687"}}}"#,
        );
        assert_eq!(config.database_url, "bolt://db:7687");
    }

    #[test]
    fn database_url_from_typed_sub_config() {
        let neo4j = parse(r#"{"databaseConfigs": {"neo4j": {"uri": "bolt://typed:7687"}}}"#);
        assert_eq!(neo4j.database_url, "bolt://typed:7687");

        let falkor = parse(
            r#"{"databaseType": "falkordb",
                "databaseConfigs": {"falkordb": {"host": "cache", "port": 6380}}}"#,
        );
        assert_eq!(falkor.database_url, "falkor://cache:6380");
    }

    #[test]
    fn database_url_falls_back_per_kind() {
        assert_eq!(parse("{}").database_url, "bolt://localhost:7687");
        assert_eq!(
            parse(r#"{"databaseType": "falkordb"}"#).database_url,
            "falkor://localhost:6379"
        );
    }

    #[test]
    fn null_database_credentials_stay_none() {
        let config = parse(r#"{"databaseUsername": null, "databasePassword": null}"#);
        assert_eq!(config.database_username, None);
        assert_eq!(config.database_password, None);
    }

    #[test]
    fn empty_credentials_use_defaults() {
        let config = parse(r#"{"databaseUsername": "", "databasePassword": ""}"#);
        assert_eq!(config.database_username.as_deref(), Some("neo4j"));
        assert_eq!(config.database_password.as_deref(), Some(""));
    }

    #[test]
    fn api_key_bag_wins_over_legacy() {
        let config = parse(
            r#"{"llmProvider": "anthropic",
                "apiKeys": {"anthropic": "bag-key"},
                "llmApiKey": "legacy-key"}"#,
        );
        assert_eq!(config.effective_llm_api_key(), "bag-key");
    }

    #[test]
    fn embedder_key_falls_back_to_llm_key() {
        let config = parse(r#"{"llmApiKey": "shared"}"#);
        assert_eq!(config.effective_embedder_api_key(), "shared");
    }

    #[test]
    fn validate_reports_missing_required_fields() {
        let config = parse(r#"{"llmProvider": "openai"}"#);
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("LLM API key")));
        assert!(errors.iter().any(|e| e.contains("At least one note")));
        assert!(errors.iter().any(|e| e.contains("models_path")));
    }

    #[test]
    fn validate_skips_llm_key_for_ollama() {
        let config = parse(r#"{"llmProvider": "ollama", "ollamaBaseUrl": "http://localhost:11434"}"#);
        assert!(!config.validate().iter().any(|e| e.contains("LLM API key")));
    }

    #[test]
    fn validate_requires_azure_fields() {
        let config = parse(r#"{"llmProvider": "azure", "llmApiKey": "k"}"#);
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("Azure endpoint")));
        assert!(errors.iter().any(|e| e.contains("Azure API version")));
    }

    #[test]
    fn validate_resolves_notes_relative_to_vault() {
        let vault = tempfile::tempdir().unwrap();
        std::fs::write(vault.path().join("daily.md"), "x").unwrap();
        let config = parse(&format!(
            r#"{{"llmApiKey": "k", "databasePassword": "p",
                 "vaultPath": {:?}, "notes": ["daily.md"]}}"#,
            vault.path().to_str().unwrap()
        ));
        assert!(!config.validate().iter().any(|e| e.contains("Note file")));
    }

    #[test]
    fn folder_mappings_parse_with_saga_fields() {
        let config = parse(
            r#"{"folderNamespaceMappings": [
                {"folderPath": "Projects/2025", "groupId": "p25",
                 "sagaGrouping": "byNoteType", "customExtractionInstructions": "focus on people"}
            ]}"#,
        );
        assert_eq!(config.folder_namespace_mappings.len(), 1);
        let mapping = &config.folder_namespace_mappings[0];
        assert_eq!(mapping.folder_path, "Projects/2025");
        assert_eq!(mapping.group_id, "p25");
        assert_eq!(mapping.saga_grouping.as_deref(), Some("byNoteType"));
    }

    #[test]
    fn redacted_hides_secrets() {
        let config = parse(
            r#"{"llmApiKey": "secret", "databasePassword": "hunter2",
                "apiKeys": {"openai": "sk-x"}, "wsAuthToken": "tok",
                "notes": ["a.md", "b.md"]}"#,
        );
        let rendered = serde_json::to_string(&config.redacted()).unwrap();
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("sk-x"));
        assert!(!rendered.contains("tok"));
        assert!(rendered.contains("[2 notes]"));
    }

    #[test]
    fn ws_defaults() {
        let config = parse("{}");
        assert_eq!(config.ws_port, DEFAULT_WS_PORT);
        assert!(config.ws_auth_token.is_empty());
    }
}
