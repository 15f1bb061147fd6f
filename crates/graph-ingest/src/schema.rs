//! Dynamic entity/edge schema.
//!
//! Users describe their ontology in the plugin's `data.json`; we materialize
//! it as plain data (tagged records the graph client consumes) instead of
//! synthesizing types at runtime. Field names are passed through exactly as
//! authored (snake_case) because the graph requires them that way.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Semantic type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Str,
    Int,
    Float,
    Bool,
    DateTime,
    StrList,
    IntList,
    FloatList,
}

impl FieldKind {
    /// Parse a `fieldType` string from `data.json`; unknown types degrade to
    /// strings, matching the authoring UI's default.
    pub fn parse(s: &str) -> Self {
        match s {
            "int" => FieldKind::Int,
            "float" => FieldKind::Float,
            "bool" => FieldKind::Bool,
            "datetime" => FieldKind::DateTime,
            "List[str]" => FieldKind::StrList,
            "List[int]" => FieldKind::IntList,
            "List[float]" => FieldKind::FloatList,
            _ => FieldKind::Str,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub description: String,
}

impl FieldSpec {
    fn optional(name: &str, kind: FieldKind, description: &str) -> Self {
        FieldSpec {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    pub description: String,
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeType {
    pub name: String,
    pub description: String,
    pub fields: Vec<FieldSpec>,
}

/// The materialized ontology.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub entity_types: Vec<EntityType>,
    pub edge_types: Vec<EdgeType>,
    /// `(source entity, target entity)` → allowed edge names.
    pub edge_type_map: BTreeMap<(String, String), Vec<String>>,
}

impl Schema {
    pub fn is_empty(&self) -> bool {
        self.entity_types.is_empty() && self.edge_types.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("schema data not found: {0}")]
    Missing(PathBuf),
    #[error("failed to read schema data: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid schema data: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("no entity or edge type data found in schema data")]
    Empty,
}

/// Loads the schema once; subsequent calls return the cached result.
#[derive(Debug)]
pub struct SchemaLoader {
    path: PathBuf,
    cell: OnceCell<Arc<Schema>>,
}

impl SchemaLoader {
    pub fn new(data_json_path: PathBuf) -> Self {
        SchemaLoader {
            path: data_json_path,
            cell: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Idempotent, thread-safe load.
    pub fn load(&self) -> Result<Arc<Schema>, SchemaError> {
        self.cell
            .get_or_try_init(|| read_schema(&self.path).map(Arc::new))
            .cloned()
    }
}

static SCHEMA_CACHE: OnceCell<std::sync::Mutex<HashMap<PathBuf, Arc<Schema>>>> = OnceCell::new();

/// Process-wide cached load, keyed by path. The first successful read wins
/// for the lifetime of the process; later file edits are not observed.
pub fn load_schema_cached(path: &Path) -> Result<Arc<Schema>, SchemaError> {
    let cache = SCHEMA_CACHE.get_or_init(|| std::sync::Mutex::new(HashMap::new()));
    if let Ok(guard) = cache.lock() {
        if let Some(schema) = guard.get(path) {
            return Ok(schema.clone());
        }
    }
    let schema = Arc::new(read_schema(path)?);
    if let Ok(mut guard) = cache.lock() {
        guard.entry(path.to_path_buf()).or_insert_with(|| schema.clone());
    }
    Ok(schema)
}

/// Parse `data.json` into a [`Schema`].
pub fn read_schema(path: &Path) -> Result<Schema, SchemaError> {
    if !path.exists() {
        return Err(SchemaError::Missing(path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path)?;
    let data: Value = serde_json::from_str(&raw)?;

    let entity_descriptions = object(&data, "entityDescriptions");
    let property_descriptions = object(&data, "propertyDescriptions");
    let property_selections = object(&data, "propertySelections");
    let edge_types_data = object(&data, "edgeTypes");
    let edge_type_map_data = data.get("edgeTypeMap").and_then(Value::as_array);

    if entity_descriptions.is_empty() && edge_types_data.is_empty() {
        return Err(SchemaError::Empty);
    }

    let mut entity_types = Vec::new();
    for (name, info) in &entity_descriptions {
        let description = info
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| builtin_description(name));

        let enabled: Vec<&str> = property_selections
            .get(name)
            .and_then(Value::as_object)
            .map(|selections| {
                selections
                    .iter()
                    .filter(|(_, enabled)| enabled.as_bool().unwrap_or(false))
                    .map(|(prop, _)| prop.as_str())
                    .collect()
            })
            .unwrap_or_default();

        let mut fields = if enabled.is_empty() {
            builtin_fields(name)
        } else {
            fields_from_descriptions(
                &enabled,
                property_descriptions.get(name).and_then(Value::as_object),
            )
        };
        // Universal base-entity field shared by every type.
        fields.push(FieldSpec::optional(
            "tags",
            FieldKind::StrList,
            "Topic keywords or classification labels for organizing content",
        ));

        entity_types.push(EntityType {
            name: name.clone(),
            description,
            fields,
        });
    }

    let mut edge_types = Vec::new();
    for (name, info) in &edge_types_data {
        let description = info
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let fields = info
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(prop_name, prop_info)| FieldSpec {
                        name: prop_name.clone(),
                        kind: FieldKind::parse(
                            prop_info.get("fieldType").and_then(Value::as_str).unwrap_or("str"),
                        ),
                        required: prop_info
                            .get("required")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                        description: prop_info
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        edge_types.push(EdgeType {
            name: name.clone(),
            description,
            fields,
        });
    }

    let mut edge_type_map = BTreeMap::new();
    for mapping in edge_type_map_data.into_iter().flatten() {
        let Some(source) = mapping.get("sourceEntity").and_then(Value::as_str) else {
            continue;
        };
        let Some(target) = mapping.get("targetEntity").and_then(Value::as_str) else {
            continue;
        };
        let allowed = mapping
            .get("allowedEdges")
            .and_then(Value::as_array)
            .map(|edges| {
                edges
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        edge_type_map.insert((source.to_string(), target.to_string()), allowed);
    }

    Ok(Schema {
        entity_types,
        edge_types,
        edge_type_map,
    })
}

fn object(data: &Value, key: &str) -> Map<String, Value> {
    data.get(key).and_then(Value::as_object).cloned().unwrap_or_default()
}

fn fields_from_descriptions(
    enabled: &[&str],
    descriptions: Option<&Map<String, Value>>,
) -> Vec<FieldSpec> {
    enabled
        .iter()
        .map(|prop| {
            let info = descriptions.and_then(|d| d.get(*prop));
            FieldSpec {
                name: (*prop).to_string(),
                kind: FieldKind::parse(
                    info.and_then(|i| i.get("fieldType")).and_then(Value::as_str).unwrap_or("str"),
                ),
                required: info
                    .and_then(|i| i.get("required"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                description: info
                    .and_then(|i| i.get("description"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Property {prop}")),
            }
        })
        .collect()
}

fn builtin_description(entity_name: &str) -> String {
    match entity_name {
        "Person" => "A human actor (natural person or national identity)",
        "Organization" => "An organization, company, or institution",
        "Technology" => "Technology, framework, programming language, or software",
        "Product" => "A product, service, or offering",
        "Project" => "A project, initiative, or undertaking",
        "WebPage" => "Web page, article, or documentation",
        "Note" => "Personal notes and ideas",
        "Article" => "Published articles and content",
        other => return format!("{other} entity"),
    }
    .to_string()
}

/// Canonical field sets used when the user has not enabled any property for a
/// known built-in type.
fn builtin_fields(entity_name: &str) -> Vec<FieldSpec> {
    use FieldKind::*;
    match entity_name {
        "Person" => vec![
            FieldSpec::optional("givenName", Str, "Given or first name"),
            FieldSpec::optional("familyName", Str, "Family name or surname"),
            FieldSpec::optional("c_name", Str, "Complete legal name"),
            FieldSpec::optional("aliases", StrList, "Alternative names or pseudonyms"),
            FieldSpec::optional("identity_type", Str, "Identity classification (natural_person, national_identity, pseudonym)"),
            FieldSpec::optional("birthDate", DateTime, "Date of birth"),
            FieldSpec::optional("address", Str, "Physical address or location"),
            FieldSpec::optional("email", Str, "Primary email address"),
            FieldSpec::optional("worksFor", Str, "Employing organization"),
            FieldSpec::optional("jobTitle", Str, "Current professional role"),
            FieldSpec::optional("url", Str, "Personal website or profile URL"),
            FieldSpec::optional("needs", Str, "Resources or support the person requires"),
            FieldSpec::optional("offers", Str, "Skills or value the person can provide"),
            FieldSpec::optional("sameAs", StrList, "URIs identifying the same person elsewhere"),
        ],
        "Organization" => vec![
            FieldSpec::optional("c_name", Str, "Complete legal name"),
            FieldSpec::optional("aliases", StrList, "Trade names, acronyms, or brands"),
            FieldSpec::optional("org_type", Str, "Legal structure (LLC, Inc, DAO, 501c3, Government, ...)"),
            FieldSpec::optional("foundingDate", DateTime, "Date of incorporation or founding"),
            FieldSpec::optional("address", Str, "Headquarters or registered address"),
            FieldSpec::optional("needs", Str, "Resources the organization requires"),
            FieldSpec::optional("offers", Str, "Products or value the organization provides"),
            FieldSpec::optional("url", Str, "Official website"),
            FieldSpec::optional("sameAs", StrList, "URIs identifying the same organization elsewhere"),
        ],
        "Technology" => vec![
            FieldSpec::optional("c_name", Str, "Complete official name"),
            FieldSpec::optional("aliases", StrList, "Alternative or abbreviated names"),
            FieldSpec::optional("category", Str, "Technology category (framework, language, database, ...)"),
            FieldSpec::optional("opensource", Bool, "Whether the technology is open source"),
            FieldSpec::optional("url", Str, "Documentation or project URL"),
            FieldSpec::optional("sameAs", StrList, "URIs identifying the same technology elsewhere"),
        ],
        "Product" => vec![
            FieldSpec::optional("c_name", Str, "Complete official product name"),
            FieldSpec::optional("aliases", StrList, "Brand variations or version names"),
            FieldSpec::optional("offering_type", Str, "Delivery model (product, service, SaaS, API, ...)"),
            FieldSpec::optional("category", Str, "Market segment or functional category"),
            FieldSpec::optional("url", Str, "Product page URL"),
            FieldSpec::optional("sameAs", StrList, "URIs identifying the same product elsewhere"),
        ],
        "Project" => vec![
            FieldSpec::optional("c_name", Str, "Complete official project name"),
            FieldSpec::optional("aliases", StrList, "Codenames or working titles"),
            FieldSpec::optional("project_type", Str, "Project kind (research, development, startup, ...)"),
            FieldSpec::optional("status", Str, "Lifecycle phase (planning, active, completed, ...)"),
            FieldSpec::optional("needs", Str, "Resources the project requires"),
            FieldSpec::optional("offers", Str, "Deliverables or value the project produces"),
            FieldSpec::optional("url", Str, "Project page or repository URL"),
            FieldSpec::optional("sameAs", StrList, "URIs identifying the same project elsewhere"),
        ],
        "WebPage" => vec![
            FieldSpec::optional("c_name", Str, "Page title or headline"),
            FieldSpec::optional("aliases", StrList, "Alternative titles"),
            FieldSpec {
                name: "url".to_string(),
                kind: Str,
                required: true,
                description: "Complete web address of the page".to_string(),
            },
            FieldSpec::optional("sameAs", StrList, "Archived or mirrored locations"),
        ],
        "Note" => vec![
            FieldSpec::optional("note_type", Str, "Note classification (idea, analysis, meeting_notes, ...)"),
            FieldSpec::optional("author", Str, "Person who wrote the note"),
            FieldSpec::optional("created_date", DateTime, "Date the note was created"),
        ],
        "Article" => vec![
            FieldSpec::optional("c_name", Str, "Article title or headline"),
            FieldSpec::optional("aliases", StrList, "Alternative or translated titles"),
            FieldSpec::optional("article_type", Str, "Content genre (essay, blog_post, whitepaper, ...)"),
            FieldSpec::optional("author", Str, "Credited author"),
            FieldSpec::optional("published_date", DateTime, "Publication date"),
            FieldSpec::optional("url", Str, "Where the article can be read"),
            FieldSpec::optional("sameAs", StrList, "Republished or archived locations"),
        ],
        _ => vec![
            FieldSpec::optional("c_name", Str, "Complete name"),
            FieldSpec::optional("aliases", StrList, "Alternative names"),
            FieldSpec::optional("sameAs", StrList, "URIs identifying the same entity elsewhere"),
        ],
    }
}
