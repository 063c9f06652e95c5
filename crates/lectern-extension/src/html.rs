//! HTML extraction (`html.*` in scripts) built on `scraper`.

use crate::error::{ExtensionError, ExtensionResult};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::collections::BTreeMap;
use url::Url;

/// One selected element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HtmlNode {
    /// Concatenated text content, whitespace collapsed.
    pub text: String,
    /// Outer HTML.
    pub html: String,
    pub inner_html: String,
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
}

impl HtmlNode {
    fn from_element(element: ElementRef<'_>) -> Self {
        Self {
            text: element_text(element),
            html: element.html(),
            inner_html: element.inner_html(),
            tag: element.value().name().to_string(),
            attrs: element
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

fn selector(css: &str) -> ExtensionResult<Selector> {
    Selector::parse(css).map_err(|e| ExtensionError::Selector(format!("{}: {}", css, e)))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

/// All elements matching `css`, in document order.
pub fn select(markup: &str, css: &str) -> ExtensionResult<Vec<HtmlNode>> {
    let selector = selector(css)?;
    let document = Html::parse_document(markup);
    Ok(document.select(&selector).map(HtmlNode::from_element).collect())
}

pub fn select_first(markup: &str, css: &str) -> ExtensionResult<Option<HtmlNode>> {
    let selector = selector(css)?;
    let document = Html::parse_document(markup);
    let first = document.select(&selector).next().map(HtmlNode::from_element);
    Ok(first)
}

/// Text of the matches joined by newlines, or of the whole document when
/// `css` is absent.
pub fn text(markup: &str, css: Option<&str>) -> ExtensionResult<String> {
    match css {
        Some(css) => {
            let selector = selector(css)?;
            let document = Html::parse_document(markup);
            let parts: Vec<String> = document.select(&selector).map(element_text).collect();
            Ok(parts.join("\n"))
        }
        None => Ok(to_text(markup)),
    }
}

/// Attribute `name` of the first match that carries it.
pub fn attr(markup: &str, css: &str, name: &str) -> ExtensionResult<Option<String>> {
    let selector = selector(css)?;
    let document = Html::parse_document(markup);
    let value = document
        .select(&selector)
        .find_map(|element| element.value().attr(name).map(str::to_string));
    Ok(value)
}

/// Plain text of a document with whitespace collapsed.
pub fn to_text(markup: &str) -> String {
    let document = Html::parse_document(markup);
    let skip = ["script", "style"];
    let text: Vec<&str> = document
        .root_element()
        .descendants()
        .filter_map(|node| {
            let parent_skipped = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| skip.contains(&e.name())))
                .unwrap_or(false);
            if parent_skipped {
                return None;
            }
            node.value().as_text().map(|t| &**t)
        })
        .collect();
    collapse_whitespace(&text.join(" "))
}

/// Resolve `href` against `base`. Absolute links pass through unchanged.
pub fn resolve(base: &str, href: &str) -> ExtensionResult<String> {
    if let Ok(absolute) = Url::parse(href) {
        return Ok(absolute.to_string());
    }
    Ok(Url::parse(base)?.join(href)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <ul class="results">
            <li><a href="/book/1" title="One">First   Book</a></li>
            <li><a href="/book/2">Second</a></li>
          </ul>
          <script>var x = 1;</script>
        </body></html>"#;

    #[test]
    fn test_select_nodes() {
        let nodes = select(PAGE, "ul.results a").unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].text, "First Book");
        assert_eq!(nodes[0].tag, "a");
        assert_eq!(nodes[0].attrs.get("href").map(String::as_str), Some("/book/1"));
        assert!(nodes[1].html.starts_with("<a"));
    }

    #[test]
    fn test_attr_and_text() {
        assert_eq!(attr(PAGE, "a", "title").unwrap(), Some("One".to_string()));
        assert_eq!(attr(PAGE, "a", "rel").unwrap(), None);
        assert_eq!(text(PAGE, Some("li")).unwrap(), "First Book\nSecond");
        let plain = to_text(PAGE);
        assert!(plain.contains("First Book Second"));
        assert!(!plain.contains("var x"));
    }

    #[test]
    fn test_bad_selector() {
        assert!(matches!(select(PAGE, "a[").unwrap_err(), ExtensionError::Selector(_)));
    }

    #[test]
    fn test_resolve() {
        assert_eq!(
            resolve("https://example.com/list/page", "/book/1").unwrap(),
            "https://example.com/book/1"
        );
        assert_eq!(
            resolve("https://example.com/a/", "b").unwrap(),
            "https://example.com/a/b"
        );
        assert_eq!(
            resolve("https://example.com", "http://other.org/x").unwrap(),
            "http://other.org/x"
        );
        assert!(resolve("not a url", "/x").is_err());
    }
}
