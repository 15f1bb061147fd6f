//! Episode assembly and the result envelope.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use obsidian_fs::Frontmatter;
use serde::Serialize;
use serde_json::Value;

/// Frontmatter keys scanned, in order, for the episode reference time.
const TIME_FIELDS: [&str; 5] = ["date", "created", "created_at", "timestamp", "modified"];

/// Outcome category reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Success,
    Failed,
    RateLimited,
    InfrastructureError,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ResultMetrics {
    pub entities_count: usize,
    pub relationships_count: usize,
    pub content_length: usize,
    pub metadata_fields: usize,
}

/// The envelope returned to the MCP client and the daemon caller.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeResult {
    pub status: EpisodeStatus,
    pub note_path: String,
    pub note_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saga_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_time: Option<String>,
    pub processing_duration_seconds: f64,
    pub start_time: String,
    pub end_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ResultMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_sync: Option<bool>,
}

/// Extract the reference time from frontmatter.
///
/// The first non-empty of `date`, `created`, `created_at`, `timestamp`,
/// `modified` is parsed as `YYYY-MM-DD` (midnight), `YYYY-MM-DDTHH:MM:SS`,
/// or `YYYY-MM-DD HH:MM:SS`; naive values become UTC. No parseable value
/// means "now". Always timezone-aware.
pub fn extract_reference_time(frontmatter: &Frontmatter) -> DateTime<Utc> {
    extract_reference_time_at(frontmatter, Utc::now())
}

pub fn extract_reference_time_at(frontmatter: &Frontmatter, now: DateTime<Utc>) -> DateTime<Utc> {
    for field in TIME_FIELDS {
        let Some(value) = frontmatter.get(field) else {
            continue;
        };
        let Some(text) = scalar_text(value) else {
            continue;
        };
        if text.is_empty() {
            continue;
        }
        if let Some(parsed) = parse_time_value(&text) {
            return parsed;
        }
    }
    now
}

fn parse_time_value(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Merge frontmatter back into the body as a `---` block.
///
/// Scalars serialize as `key: value` lines; lists and maps as JSON. The
/// merged block plus the plain text is the episode body the graph sees.
pub fn merge_frontmatter_into_body(frontmatter: &Frontmatter, text: &str) -> String {
    if frontmatter.is_empty() {
        return text.to_string();
    }
    let mut lines = vec!["---".to_string()];
    for (key, value) in frontmatter {
        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string(value).unwrap_or_default()
            }
            Value::Null => "null".to_string(),
            other => other.to_string(),
        };
        lines.push(format!("{key}: {rendered}"));
    }
    lines.push("---".to_string());
    format!("{}\n{text}", lines.join("\n"))
}

/// Source description: frontmatter `type` first, then the configured default.
pub fn resolve_source_description(frontmatter: &Frontmatter, configured: Option<&str>) -> String {
    if let Some(value) = frontmatter.get("type") {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if !text.is_empty() {
            return text;
        }
    }
    configured.unwrap_or("obsidian_note").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frontmatter(pairs: &[(&str, Value)]) -> Frontmatter {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn date_only_becomes_midnight_utc() {
        let fm = frontmatter(&[("date", json!("2030-05-04"))]);
        let t = extract_reference_time(&fm);
        assert_eq!(t, Utc.with_ymd_and_hms(2030, 5, 4, 0, 0, 0).unwrap());
    }

    #[test]
    fn datetime_formats_parse() {
        let iso = frontmatter(&[("created", json!("2030-05-04T10:20:30"))]);
        let spaced = frontmatter(&[("created", json!("2030-05-04 10:20:30"))]);
        let expected = Utc.with_ymd_and_hms(2030, 5, 4, 10, 20, 30).unwrap();
        assert_eq!(extract_reference_time(&iso), expected);
        assert_eq!(extract_reference_time(&spaced), expected);
    }

    #[test]
    fn field_order_is_respected() {
        let fm = frontmatter(&[
            ("modified", json!("2031-01-01")),
            ("date", json!("2030-01-01")),
        ]);
        assert_eq!(
            extract_reference_time(&fm),
            Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn unparseable_value_falls_back_to_now() {
        let now = Utc.with_ymd_and_hms(2032, 6, 1, 12, 0, 0).unwrap();
        let fm = frontmatter(&[("date", json!("next tuesday"))]);
        assert_eq!(extract_reference_time_at(&fm, now), now);
        assert_eq!(extract_reference_time_at(&Frontmatter::new(), now), now);
    }

    #[test]
    fn merge_renders_scalars_and_json_complexes() {
        let fm = frontmatter(&[
            ("title", json!("My Note")),
            ("count", json!(3)),
            ("tags", json!(["a", "b"])),
        ]);
        let body = merge_frontmatter_into_body(&fm, "content");
        assert_eq!(
            body,
            "---\ntitle: My Note\ncount: 3\ntags: [\"a\",\"b\"]\n---\ncontent"
        );
    }

    #[test]
    fn merge_without_frontmatter_is_identity() {
        assert_eq!(merge_frontmatter_into_body(&Frontmatter::new(), "content"), "content");
    }

    #[test]
    fn source_description_prefers_frontmatter_type() {
        let fm = frontmatter(&[("type", json!("meeting"))]);
        assert_eq!(resolve_source_description(&fm, Some("default")), "meeting");
        assert_eq!(
            resolve_source_description(&Frontmatter::new(), Some("default")),
            "default"
        );
        assert_eq!(resolve_source_description(&Frontmatter::new(), None), "obsidian_note");
    }
}
