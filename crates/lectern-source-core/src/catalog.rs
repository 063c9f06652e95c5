//! Source catalog: lookup by id plus file loading.

use crate::error::{Result, SourceError};
use crate::source::SourceDefinition;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

/// Read access to source definitions.
pub trait SourceCatalog: Send + Sync {
    fn get(&self, id: &str) -> Option<SourceDefinition>;

    /// Every source, ordered by id.
    fn list(&self) -> Vec<SourceDefinition>;
}

/// A catalog held in memory.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    sources: RwLock<BTreeMap<String, SourceDefinition>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sources(sources: impl IntoIterator<Item = SourceDefinition>) -> Self {
        let catalog = Self::new();
        for source in sources {
            catalog.insert(source);
        }
        catalog
    }

    /// Load a catalog from a sources file. See [`load_sources`].
    pub fn from_path(path: &Path) -> Result<Self> {
        Ok(Self::from_sources(load_sources(path)?))
    }

    /// Insert or replace a source. Returns the replaced definition.
    pub fn insert(&self, source: SourceDefinition) -> Option<SourceDefinition> {
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.id.clone(), source)
    }

    pub fn remove(&self, id: &str) -> Option<SourceDefinition> {
        self.sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.sources.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SourceCatalog for InMemoryCatalog {
    fn get(&self, id: &str) -> Option<SourceDefinition> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn list(&self) -> Vec<SourceDefinition> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

// ============================================================================
// Loading
// ============================================================================

#[derive(Deserialize)]
struct TomlSources {
    #[serde(default)]
    source: Vec<SourceDefinition>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonSources {
    Many(Vec<SourceDefinition>),
    One(Box<SourceDefinition>),
}

/// Load source definitions from a file.
///
/// `.toml` files hold `[[source]]` tables; anything else is read as JSON,
/// either an array of sources or a single source. Sources that fail
/// validation are skipped with a warning.
pub fn load_sources(path: &Path) -> Result<Vec<SourceDefinition>> {
    let content = std::fs::read_to_string(path)?;
    let format = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("json")
        .to_ascii_lowercase();

    let sources = parse_sources(&content, &format).map_err(|e| SourceError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    debug!(path = %path.display(), count = sources.len(), "Loaded sources");
    Ok(sources)
}

/// Parse source definitions from text in `format` (`toml` or `json`).
pub fn parse_sources(content: &str, format: &str) -> Result<Vec<SourceDefinition>> {
    let parsed = match format {
        "toml" => toml::from_str::<TomlSources>(content)?.source,
        "json" => match serde_json::from_str::<JsonSources>(content)? {
            JsonSources::Many(sources) => sources,
            JsonSources::One(source) => vec![*source],
        },
        other => return Err(SourceError::UnsupportedFormat(other.to_string())),
    };

    Ok(parsed
        .into_iter()
        .filter(|source| match source.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!("Skipping source: {}", e);
                false
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_insert_and_lookup() {
        let catalog = InMemoryCatalog::new();
        assert!(catalog.is_empty());
        catalog.insert(SourceDefinition::new("b", "B", "https://b.example"));
        catalog.insert(SourceDefinition::new("a", "A", "https://a.example"));

        assert_eq!(catalog.get("a").map(|s| s.name), Some("A".to_string()));
        let ids: Vec<String> = catalog.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(catalog.remove("a").is_some());
        assert!(catalog.get("a").is_none());
    }

    #[test]
    fn test_parse_skips_invalid_sources() {
        let json = r#"[
            {"id": "ok", "name": "Ok", "baseUrl": "https://ok.example"},
            {"id": "bad", "name": "Bad", "baseUrl": "nowhere"}
        ]"#;
        let sources = parse_sources(json, "json").unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id, "ok");
    }

    #[test]
    fn test_parse_single_json_object() {
        let json = r#"{"id": "one", "name": "One", "baseUrl": "https://one.example"}"#;
        assert_eq!(parse_sources(json, "json").unwrap().len(), 1);
    }

    #[test]
    fn test_unsupported_format() {
        assert!(matches!(
            parse_sources("", "yaml"),
            Err(SourceError::UnsupportedFormat(_))
        ));
    }
}
