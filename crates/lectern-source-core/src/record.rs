//! Records produced by the rule stages.
//!
//! Scripts return loosely typed tables, so every field defaults when missing
//! and scalar fields accept numbers and booleans as well as strings.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One hit of a search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResultRecord {
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub author: String,
    #[serde(deserialize_with = "lenient_string")]
    pub cover_url: String,
    #[serde(deserialize_with = "lenient_string")]
    pub item_url: String,
    #[serde(deserialize_with = "lenient_string")]
    pub intro: String,
    #[serde(deserialize_with = "lenient_string")]
    pub kind: String,
    #[serde(deserialize_with = "lenient_string")]
    pub last_chapter: String,
}

impl ResultRecord {
    pub fn resolve_links(&mut self, resolve: impl Fn(&str) -> String) {
        self.cover_url = resolve(&self.cover_url);
        self.item_url = resolve(&self.item_url);
    }
}

/// Details of one item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemRecord {
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub author: String,
    #[serde(deserialize_with = "lenient_string")]
    pub cover_url: String,
    #[serde(deserialize_with = "lenient_string")]
    pub intro: String,
    #[serde(deserialize_with = "lenient_string")]
    pub kind: String,
    #[serde(deserialize_with = "lenient_string")]
    pub last_chapter: String,
    #[serde(deserialize_with = "lenient_string")]
    pub word_count: String,
    #[serde(deserialize_with = "lenient_string")]
    pub toc_url: String,
    #[serde(deserialize_with = "lenient_string")]
    pub item_url: String,
}

impl ItemRecord {
    /// Fill every empty field from `base`.
    pub fn inherit(&mut self, base: &ItemRecord) {
        let fields = [
            (&mut self.name, &base.name),
            (&mut self.author, &base.author),
            (&mut self.cover_url, &base.cover_url),
            (&mut self.intro, &base.intro),
            (&mut self.kind, &base.kind),
            (&mut self.last_chapter, &base.last_chapter),
            (&mut self.word_count, &base.word_count),
            (&mut self.toc_url, &base.toc_url),
            (&mut self.item_url, &base.item_url),
        ];
        for (field, fallback) in fields {
            if field.is_empty() {
                field.clone_from(fallback);
            }
        }
    }

    pub fn resolve_links(&mut self, resolve: impl Fn(&str) -> String) {
        self.cover_url = resolve(&self.cover_url);
        self.toc_url = resolve(&self.toc_url);
        self.item_url = resolve(&self.item_url);
    }

    /// Page listing the item's entries: `tocUrl`, else `itemUrl`.
    pub fn toc_link(&self) -> &str {
        if self.toc_url.is_empty() {
            &self.item_url
        } else {
            &self.toc_url
        }
    }
}

impl From<ResultRecord> for ItemRecord {
    fn from(result: ResultRecord) -> Self {
        Self {
            name: result.name,
            author: result.author,
            cover_url: result.cover_url,
            intro: result.intro,
            kind: result.kind,
            last_chapter: result.last_chapter,
            word_count: String::new(),
            toc_url: String::new(),
            item_url: result.item_url,
        }
    }
}

/// One table-of-contents entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EntryRecord {
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub url: String,
    #[serde(deserialize_with = "lenient_bool")]
    pub is_volume: bool,
}

impl EntryRecord {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            is_volume: false,
        }
    }

    pub fn resolve_links(&mut self, resolve: impl Fn(&str) -> String) {
        self.url = resolve(&self.url);
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => matches!(s.trim(), "true" | "1" | "yes"),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_record_is_lenient() {
        let record: ResultRecord = serde_json::from_value(json!({
            "name": " Dune ",
            "author": ["Frank Herbert", "Brian Herbert"],
            "lastChapter": 42,
            "unknown": "ignored",
        }))
        .unwrap();
        assert_eq!(record.name, "Dune");
        assert_eq!(record.author, "Frank Herbert, Brian Herbert");
        assert_eq!(record.last_chapter, "42");
        assert_eq!(record.item_url, "");
    }

    #[test]
    fn test_item_inherits_missing_fields() {
        let base = ItemRecord::from(ResultRecord {
            name: "Dune".to_string(),
            author: "Herbert".to_string(),
            item_url: "https://x/dune".to_string(),
            ..Default::default()
        });
        let mut item: ItemRecord =
            serde_json::from_value(json!({"intro": "Spice", "author": null})).unwrap();
        item.inherit(&base);
        assert_eq!(item.name, "Dune");
        assert_eq!(item.author, "Herbert");
        assert_eq!(item.intro, "Spice");
        assert_eq!(item.toc_link(), "https://x/dune");
    }

    #[test]
    fn test_entry_flags() {
        let entries: Vec<EntryRecord> = serde_json::from_value(json!([
            {"title": "Book One", "isVolume": "true"},
            {"title": "Chapter 1", "url": "c1", "isVolume": 0},
            {"title": "Chapter 2", "url": "c2"},
        ]))
        .unwrap();
        assert!(entries[0].is_volume);
        assert!(!entries[1].is_volume);
        assert_eq!(entries[2], EntryRecord::new("Chapter 2", "c2"));
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(EntryRecord::new("A", "a")).unwrap();
        assert_eq!(json, json!({"title": "A", "url": "a", "isVolume": false}));
    }
}
