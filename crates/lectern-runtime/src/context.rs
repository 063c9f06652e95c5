//! Per-execution inputs.

use crate::policy::CapabilityPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Values bound as script globals for one execution.
///
/// `source`, `item` and `chapter` become globals of the same name; every
/// `extra` entry becomes a global named by its key. A context is moved into
/// the worker running the script and never shared between executions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default)]
    pub source: Option<Value>,
    #[serde(default)]
    pub item: Option<Value>,
    #[serde(default)]
    pub chapter: Option<Value>,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Value) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_item(mut self, item: Value) -> Self {
        self.item = Some(item);
        self
    }

    pub fn with_chapter(mut self, chapter: Value) -> Self {
        self.chapter = Some(chapter);
        self
    }

    /// Bind an extra global.
    pub fn with_var(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    /// Label used in log events: the bound source's `id`, if any.
    pub fn label(&self) -> String {
        self.source
            .as_ref()
            .and_then(|source| source.get("id"))
            .and_then(Value::as_str)
            .unwrap_or("anonymous")
            .to_string()
    }
}

/// Everything needed to run one script.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub code: String,
    /// Global function to call after the chunk runs. Without one, the
    /// chunk's own return value is the result.
    pub entry: Option<String>,
    pub context: ExecutionContext,
    pub policy: CapabilityPolicy,
    /// Arguments passed to the entry function.
    pub args: Vec<Value>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, policy: CapabilityPolicy) -> Self {
        Self {
            code: code.into(),
            entry: None,
            context: ExecutionContext::default(),
            policy,
            args: Vec::new(),
        }
    }

    pub fn with_entry(mut self, entry: impl Into<String>, args: Vec<Value>) -> Self {
        self.entry = Some(entry.into());
        self.args = args;
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_label_from_source_id() {
        let ctx = ExecutionContext::new().with_source(json!({"id": "novels-r-us"}));
        assert_eq!(ctx.label(), "novels-r-us");
        assert_eq!(ExecutionContext::new().label(), "anonymous");
    }
}
