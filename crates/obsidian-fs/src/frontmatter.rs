//! YAML frontmatter extraction.
//!
//! A frontmatter block is delimited by `---` on the very first line and a
//! later `---` at the start of a line:
//!
//! ```markdown
//! ---
//! title: My Note
//! tags: [rust, graphs]
//! ---
//!
//! Note content here...
//! ```
//!
//! The block is parsed with `serde_yaml`; if that fails (Obsidian tolerates
//! some almost-YAML), a minimal `key: scalar` parser takes over so a sloppy
//! note still yields its metadata.

use serde_json::{Map, Value};

/// Parsed frontmatter as ordered string keys to JSON values.
pub type Frontmatter = Map<String, Value>;

/// Split a note into its raw frontmatter text and the remaining body, without
/// parsing the YAML. Returns `(None, raw)` when no complete block exists.
pub fn split_frontmatter(raw: &str) -> (Option<&str>, &str) {
    if !raw.starts_with("---") {
        return (None, raw);
    }

    let after_opening = &raw[3..];
    let block_start = if let Some(rest) = after_opening.strip_prefix("\r\n") {
        rest
    } else if let Some(rest) = after_opening.strip_prefix('\n') {
        rest
    } else {
        // No newline after the opening fence means this is not frontmatter.
        return (None, raw);
    };

    let Some(close) = find_closing_delimiter(block_start) else {
        return (None, raw);
    };

    let yaml = &block_start[..close];
    let after_close = &block_start[close + 3..];
    let body = after_close
        .strip_prefix("\r\n")
        .or_else(|| after_close.strip_prefix('\n'))
        .unwrap_or(after_close);

    (Some(yaml), body)
}

/// Byte offset of the closing `---` (must begin a line).
fn find_closing_delimiter(s: &str) -> Option<usize> {
    let mut pos = 0;
    for line in s.lines() {
        if line == "---" || line == "---\r" {
            return Some(pos);
        }
        pos += line.len() + 1;
    }
    None
}

/// Extract frontmatter and body from a raw note.
///
/// Always total: a note without a block yields an empty map and the original
/// content.
pub fn extract_frontmatter(raw: &str) -> (Frontmatter, String) {
    let (yaml, body) = split_frontmatter(raw);
    let Some(yaml) = yaml else {
        return (Frontmatter::new(), raw.to_string());
    };

    let frontmatter = match serde_yaml::from_str::<serde_yaml::Value>(yaml) {
        Ok(parsed) => yaml_to_json_map(parsed).unwrap_or_default(),
        Err(err) => {
            tracing::warn!("frontmatter YAML parse failed, using fallback parser: {err}");
            parse_simple_frontmatter(yaml)
        }
    };

    (frontmatter, body.to_string())
}

/// Minimal `key: scalar` fallback parser. Strips surrounding quotes and
/// coerces `true`/`false`, integer, and float literals.
pub(crate) fn parse_simple_frontmatter(yaml: &str) -> Frontmatter {
    let mut map = Frontmatter::new();
    for line in yaml.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        map.insert(key.to_string(), coerce_scalar(value.trim()));
    }
    map
}

fn coerce_scalar(value: &str) -> Value {
    let unquoted = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')));
    if let Some(text) = unquoted {
        return Value::from(text);
    }
    match value.to_ascii_lowercase().as_str() {
        "true" => return Value::from(true),
        "false" => return Value::from(false),
        _ => {}
    }
    if let Ok(n) = value.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = value.parse::<f64>() {
        return Value::from(f);
    }
    Value::from(value)
}

fn yaml_to_json_map(yaml: serde_yaml::Value) -> Option<Frontmatter> {
    match yaml {
        serde_yaml::Value::Mapping(mapping) => {
            let mut map = Frontmatter::new();
            for (key, value) in mapping {
                if let serde_yaml::Value::String(key) = key {
                    map.insert(key, yaml_to_json(value));
                }
            }
            Some(map)
        }
        _ => None,
    }
}

fn yaml_to_json(yaml: serde_yaml::Value) -> Value {
    match yaml {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(f) = n.as_f64() {
                serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
            } else {
                Value::Null
            }
        }
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(seq) => {
            Value::Array(seq.into_iter().map(yaml_to_json).collect())
        }
        serde_yaml::Value::Mapping(mapping) => {
            let map: Map<String, Value> = mapping
                .into_iter()
                .filter_map(|(k, v)| match k {
                    serde_yaml::Value::String(key) => Some((key, yaml_to_json(v))),
                    _ => None,
                })
                .collect();
            Value::Object(map)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}
