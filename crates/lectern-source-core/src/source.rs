//! Content-source definitions.

use crate::error::{Result, SourceError};
use lectern_runtime::{CapabilityPolicy, TrustThresholds};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use url::Url;

/// The four rule stages of a source, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Search,
    ItemInfo,
    TableOfContents,
    Content,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Search,
        Stage::ItemInfo,
        Stage::TableOfContents,
        Stage::Content,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Search => "search",
            Stage::ItemInfo => "item_info",
            Stage::TableOfContents => "table_of_contents",
            Stage::Content => "content",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_enabled() -> bool {
    true
}

/// A third-party content source.
///
/// Read-only to the engine. Rules are Lua function bodies that receive
/// `input` and `body` and return the stage's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDefinition {
    pub id: String,
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub weight: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Lower is more trusted; see [`TrustThresholds`].
    #[serde(default)]
    pub trust_rating: i32,
    /// Search page template with `{{key}}` and `{{page}}` placeholders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_url: Option<String>,
    /// Script returning a table of extra request headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_script: Option<String>,
    #[serde(default)]
    pub search_rule: String,
    #[serde(default)]
    pub item_info_rule: String,
    #[serde(default)]
    pub toc_rule: String,
    #[serde(default)]
    pub content_rule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_override: Option<CapabilityPolicy>,
}

impl SourceDefinition {
    /// A source with no rules, enabled, with rating 0.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            base_url: base_url.into(),
            weight: 0,
            enabled: true,
            trust_rating: 0,
            search_url: None,
            header_script: None,
            search_rule: String::new(),
            item_info_rule: String::new(),
            toc_rule: String::new(),
            content_rule: String::new(),
            policy_override: None,
        }
    }

    /// Rule body for `stage`.
    pub fn rule(&self, stage: Stage) -> &str {
        match stage {
            Stage::Search => &self.search_rule,
            Stage::ItemInfo => &self.item_info_rule,
            Stage::TableOfContents => &self.toc_rule,
            Stage::Content => &self.content_rule,
        }
    }

    /// Check the fields the engine relies on.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| SourceError::Invalid {
            id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty".to_string()));
        }
        let base = Url::parse(&self.base_url)
            .map_err(|e| invalid(format!("baseUrl '{}': {}", self.base_url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid(format!("baseUrl scheme '{}' is not http(s)", base.scheme())));
        }
        Ok(())
    }

    /// The policy scripts of this source run under: the override if present,
    /// otherwise the level for its trust rating.
    pub fn policy(&self, thresholds: &TrustThresholds) -> CapabilityPolicy {
        self.policy_override
            .clone()
            .unwrap_or_else(|| CapabilityPolicy::for_source_with(self.trust_rating, thresholds))
    }

    /// Fields exposed to scripts as the `source` global. Rules and header
    /// scripts are not part of it.
    pub fn public_view(&self) -> Value {
        let mut view = json!({
            "id": self.id,
            "name": self.name,
            "baseUrl": self.base_url,
            "weight": self.weight,
            "trustRating": self.trust_rating,
        });
        if let Some(search_url) = &self.search_url {
            view["searchUrl"] = json!(search_url);
        }
        view
    }

    /// Resolve `href` against the base URL. Absolute links and links that
    /// cannot be resolved are returned unchanged.
    pub fn resolve_url(&self, href: &str) -> String {
        if href.is_empty() || Url::parse(href).is_ok() {
            return href.to_string();
        }
        Url::parse(&self.base_url)
            .and_then(|base| base.join(href))
            .map(|url| url.to_string())
            .unwrap_or_else(|_| href.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_runtime::PolicyLevel;

    fn source() -> SourceDefinition {
        SourceDefinition::new("novels", "Novels", "https://novels.example/lib/")
    }

    #[test]
    fn test_camel_case_with_defaults() {
        let parsed: SourceDefinition = serde_json::from_value(json!({
            "id": "s1",
            "name": "S1",
            "baseUrl": "https://s1.example",
            "trustRating": 2,
            "searchRule": "return {}",
        }))
        .unwrap();
        assert!(parsed.enabled);
        assert_eq!(parsed.weight, 0);
        assert_eq!(parsed.trust_rating, 2);
        assert_eq!(parsed.rule(Stage::Search), "return {}");
        assert_eq!(parsed.rule(Stage::Content), "");
        assert!(parsed.policy_override.is_none());
    }

    #[test]
    fn test_validate() {
        assert!(source().validate().is_ok());

        let mut bad = source();
        bad.base_url = "not a url".to_string();
        assert!(matches!(bad.validate(), Err(SourceError::Invalid { .. })));

        let mut ftp = source();
        ftp.base_url = "ftp://files.example".to_string();
        assert!(ftp.validate().is_err());

        let mut blank = source();
        blank.id = " ".to_string();
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_policy_prefers_override() {
        let thresholds = TrustThresholds::default();
        let mut src = source();
        src.trust_rating = 1;
        assert_eq!(src.policy(&thresholds), CapabilityPolicy::for_level(PolicyLevel::Trusted));

        src.policy_override = Some(CapabilityPolicy::for_level(PolicyLevel::Standard));
        assert_eq!(src.policy(&thresholds), CapabilityPolicy::for_level(PolicyLevel::Standard));
    }

    #[test]
    fn test_policy_override_from_level_name() {
        let parsed: SourceDefinition = serde_json::from_value(json!({
            "id": "s1",
            "name": "S1",
            "baseUrl": "https://s1.example",
            "policyOverride": "compatible",
        }))
        .unwrap();
        assert_eq!(
            parsed.policy_override,
            Some(CapabilityPolicy::for_level(PolicyLevel::Compatible))
        );
    }

    #[test]
    fn test_public_view_hides_rules() {
        let mut src = source();
        src.search_rule = "secret".to_string();
        let view = src.public_view();
        assert_eq!(view["baseUrl"], "https://novels.example/lib/");
        assert!(view.get("searchRule").is_none());
        assert!(view.get("searchUrl").is_none());
    }

    #[test]
    fn test_resolve_url() {
        let src = source();
        assert_eq!(src.resolve_url("book/1"), "https://novels.example/lib/book/1");
        assert_eq!(src.resolve_url("/top"), "https://novels.example/top");
        assert_eq!(src.resolve_url("http://other.example/x"), "http://other.example/x");
        assert_eq!(src.resolve_url(""), "");
    }
}
