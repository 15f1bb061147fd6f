//! Dual-convention key lookup.

use serde_json::{Map, Value};

/// Look up a config key under both naming conventions, snake_case first.
/// `null` counts as absent so a camelCase value can still apply.
pub fn pick<'a>(map: &'a Map<String, Value>, snake: &str, camel: &str) -> Option<&'a Value> {
    map.get(snake)
        .filter(|v| !v.is_null())
        .or_else(|| map.get(camel).filter(|v| !v.is_null()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_snake_key_defers_to_camel() {
        let value = json!({"group_id": null, "groupId": "books"});
        let map = value.as_object().unwrap();
        assert_eq!(pick(map, "group_id", "groupId").unwrap(), "books");
    }

    #[test]
    fn missing_both_is_none() {
        let value = json!({});
        assert!(pick(value.as_object().unwrap(), "a", "b").is_none());
    }
}
