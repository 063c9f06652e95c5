//! JSON helpers (`json.*` in scripts).

use crate::error::{ExtensionError, ExtensionResult};
use serde_json::Value;
use serde_json_path::JsonPath;

pub fn parse(text: &str) -> ExtensionResult<Value> {
    Ok(serde_json::from_str(text)?)
}

pub fn stringify(value: &Value, pretty: bool) -> ExtensionResult<String> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(text)
}

/// Evaluate an RFC 9535 JSONPath query and return every matched node.
pub fn path(value: &Value, query: &str) -> ExtensionResult<Vec<Value>> {
    let path = JsonPath::parse(query)
        .map_err(|e| ExtensionError::Json(format!("invalid path '{}': {}", query, e)))?;
    Ok(path.query(value).all().into_iter().cloned().collect())
}
