//! Turning script return values into typed records.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "table",
    }
}

/// A string holding JSON is replaced by the parsed value.
pub(crate) fn decode_json_string(value: Value) -> Value {
    match value {
        Value::String(text) => match serde_json::from_str::<Value>(text.trim()) {
            Ok(parsed) => parsed,
            Err(_) => Value::String(text),
        },
        other => other,
    }
}

/// A list of records. `nil` and an empty table are an empty list.
pub(crate) fn records<T: DeserializeOwned>(value: Value) -> Result<Vec<T>, String> {
    match decode_json_string(value) {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) if map.is_empty() => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value(item).map_err(|e| format!("record {}: {}", i + 1, e))
            })
            .collect(),
        other => Err(format!("expected a list of records, got {}", kind(&other))),
    }
}

/// A single record. `nil` yields the default record.
pub(crate) fn record<T: DeserializeOwned + Default>(value: Value) -> Result<T, String> {
    match decode_json_string(value) {
        Value::Null => Ok(T::default()),
        value @ Value::Object(_) => serde_json::from_value(value).map_err(|e| e.to_string()),
        other => Err(format!("expected a record table, got {}", kind(&other))),
    }
}

/// Chapter text. A list of strings is joined line by line.
pub(crate) fn text(value: Value) -> Result<String, String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(text) => Ok(text),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(line) => Ok(line),
                other => Err(format!("expected a list of strings, got {}", kind(&other))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|lines| lines.join("\n")),
        other => Err(format!("expected text, got {}", kind(&other))),
    }
}

/// Request headers returned by a header script.
pub(crate) fn headers(value: Value) -> Result<BTreeMap<String, String>, String> {
    match decode_json_string(value) {
        Value::Null => Ok(BTreeMap::new()),
        Value::Array(items) if items.is_empty() => Ok(BTreeMap::new()),
        Value::Object(map) => map
            .into_iter()
            .map(|(name, value)| match value {
                Value::String(s) => Ok((name, s)),
                Value::Number(n) => Ok((name, n.to_string())),
                Value::Bool(b) => Ok((name, b.to_string())),
                other => Err(format!("header '{}' must be a string, got {}", name, kind(&other))),
            })
            .collect(),
        other => Err(format!("header script must return a table, got {}", kind(&other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_source_core::{EntryRecord, ItemRecord, ResultRecord};
    use serde_json::json;

    #[test]
    fn test_records_from_json_string() {
        let value = json!(r#"[{"name":"X","author":"Y","itemUrl":"http://x"}]"#);
        let records: Vec<ResultRecord> = records(value).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].author, "Y");
    }

    #[test]
    fn test_empty_shapes_are_empty_lists() {
        assert!(records::<EntryRecord>(Value::Null).unwrap().is_empty());
        assert!(records::<EntryRecord>(json!({})).unwrap().is_empty());
        assert!(records::<EntryRecord>(json!("[]")).unwrap().is_empty());
    }

    #[test]
    fn test_shape_mismatch() {
        let err = records::<EntryRecord>(json!(5)).unwrap_err();
        assert_eq!(err, "expected a list of records, got number");
        assert!(records::<EntryRecord>(json!("not json")).is_err());
        assert!(record::<ItemRecord>(json!([1, 2])).is_err());
    }

    #[test]
    fn test_text_joins_lines() {
        assert_eq!(text(json!(["a", "b"])).unwrap(), "a\nb");
        assert_eq!(text(Value::Null).unwrap(), "");
        assert!(text(json!({"a": 1})).is_err());
    }

    #[test]
    fn test_headers() {
        let map = headers(json!({"X-Token": "abc", "X-N": 2})).unwrap();
        assert_eq!(map["X-Token"], "abc");
        assert_eq!(map["X-N"], "2");
        assert!(headers(json!({})).unwrap().is_empty());
        assert!(headers(json!({"X": {"nested": true}})).is_err());
    }
}
