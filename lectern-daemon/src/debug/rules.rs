//! Single-rule evaluation against a sample document.

use super::{DebugError, Result};
use lectern_extension::{html, json};
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use sxd_document::dom::{Document, Element};
use sxd_document::Package;
use tracing::debug;

/// Extraction rule dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    /// CSS selector; `selector@attr` extracts an attribute instead of text.
    Css,
    /// XPath 1.0. Well-formed XML is queried as is; anything else is parsed
    /// as HTML first.
    Xpath,
    /// Regular expression; capture group 1 when present, else the match.
    Regex,
    /// RFC 9535 JSONPath over a JSON sample.
    Jsonpath,
}

impl RuleType {
    pub const ALL: [RuleType; 4] = [
        RuleType::Css,
        RuleType::Xpath,
        RuleType::Regex,
        RuleType::Jsonpath,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Css => "css",
            RuleType::Xpath => "xpath",
            RuleType::Regex => "regex",
            RuleType::Jsonpath => "jsonpath",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = DebugError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        RuleType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| {
                let known: Vec<_> = RuleType::ALL.iter().map(RuleType::as_str).collect();
                DebugError::Validation(format!(
                    "unknown rule type '{}', expected one of: {}",
                    s,
                    known.join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTestRequest {
    /// Kept as text so an unknown type is a validation error rather than a
    /// deserialization failure.
    pub rule_type: String,
    pub rule: String,
    pub sample: String,
}

impl RuleTestRequest {
    pub fn new(rule_type: RuleType, rule: impl Into<String>, sample: impl Into<String>) -> Self {
        Self {
            rule_type: rule_type.as_str().to_string(),
            rule: rule.into(),
            sample: sample.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTestResponse {
    pub extracted: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

/// Evaluates rules in isolation. Holds no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleTester;

impl RuleTester {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `request.rule` against `request.sample`.
    ///
    /// A bad rule type or an empty rule is a request error. A rule that fails
    /// to compile or a sample that cannot be evaluated is reported in
    /// [`RuleTestResponse::error`].
    pub fn test_rule(&self, request: &RuleTestRequest) -> Result<RuleTestResponse> {
        let rule_type: RuleType = request.rule_type.parse()?;
        if request.rule.trim().is_empty() {
            return Err(DebugError::Validation("rule must not be empty".to_string()));
        }

        let started = Instant::now();
        let outcome = match rule_type {
            RuleType::Css => css(&request.rule, &request.sample),
            RuleType::Xpath => xpath(&request.rule, &request.sample),
            RuleType::Regex => regex(&request.rule, &request.sample),
            RuleType::Jsonpath => jsonpath(&request.rule, &request.sample),
        };
        let execution_time_ms = started.elapsed().as_millis() as u64;

        let response = match outcome {
            Ok(extracted) => RuleTestResponse {
                extracted,
                error: None,
                execution_time_ms,
            },
            Err(error) => RuleTestResponse {
                extracted: Vec::new(),
                error: Some(error),
                execution_time_ms,
            },
        };
        debug!(
            rule_type = %rule_type,
            matches = response.extracted.len(),
            failed = response.error.is_some(),
            "Tested rule"
        );
        Ok(response)
    }
}

/// Split `selector@attr`. An `@` that is not followed by an attribute name
/// stays part of the selector.
fn split_attr(rule: &str) -> (&str, Option<&str>) {
    match rule.rsplit_once('@') {
        Some((selector, attr))
            if !selector.trim().is_empty()
                && !attr.is_empty()
                && attr
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':') =>
        {
            (selector.trim(), Some(attr))
        }
        _ => (rule.trim(), None),
    }
}

fn css(rule: &str, sample: &str) -> std::result::Result<Vec<String>, String> {
    let (selector, attr) = split_attr(rule);
    let nodes = html::select(sample, selector).map_err(|e| e.to_string())?;
    Ok(match attr {
        Some(attr) => nodes
            .into_iter()
            .filter_map(|mut node| node.attrs.remove(attr))
            .collect(),
        None => nodes.into_iter().map(|node| node.text).collect(),
    })
}

fn xpath(rule: &str, sample: &str) -> std::result::Result<Vec<String>, String> {
    use sxd_xpath::Value;

    let package = sxd_document::parser::parse(sample).unwrap_or_else(|_| html_package(sample));
    let document = package.as_document();
    let value = sxd_xpath::evaluate_xpath(&document, rule)
        .map_err(|e| format!("xpath error: {}", e))?;

    Ok(match value {
        Value::Nodeset(nodes) => nodes
            .document_order()
            .into_iter()
            .map(|node| node.string_value())
            .collect(),
        Value::String(text) => vec![text],
        Value::Number(number) => vec![number.to_string()],
        Value::Boolean(flag) => vec![flag.to_string()],
    })
}

/// Build an XPath document from HTML. Elements carry no namespace, so
/// `//div` matches the way it reads.
fn html_package(sample: &str) -> Package {
    let html = Html::parse_document(sample);
    let package = Package::new();
    {
        let document = package.as_document();
        let root = copy_element(&document, html.root_element());
        document.root().append_child(root);
    }
    package
}

fn copy_element<'d>(document: &Document<'d>, source: ElementRef<'_>) -> Element<'d> {
    let element = document.create_element(source.value().name());
    for (name, value) in source.value().attrs() {
        element.set_attribute_value(name, value);
    }
    for child in source.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            element.append_child(copy_element(document, child_element));
        } else if let Some(text) = child.value().as_text() {
            element.append_child(document.create_text(text));
        } else if let Some(comment) = child.value().as_comment() {
            element.append_child(document.create_comment(comment));
        }
    }
    element
}

fn regex(rule: &str, sample: &str) -> std::result::Result<Vec<String>, String> {
    let re = Regex::new(rule).map_err(|e| format!("invalid pattern: {}", e))?;
    let group = if re.captures_len() > 1 { 1 } else { 0 };
    Ok(re
        .captures_iter(sample)
        .filter_map(|caps| caps.get(group).map(|m| m.as_str().to_string()))
        .collect())
}

fn jsonpath(rule: &str, sample: &str) -> std::result::Result<Vec<String>, String> {
    let document = json::parse(sample).map_err(|e| e.to_string())?;
    let nodes = json::path(&document, rule).map_err(|e| e.to_string())?;
    Ok(nodes
        .into_iter()
        .map(|node| match node {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <ul class="books">
            <li><a href="/b/1">Dune</a></li>
            <li><a href="/b/2">Emma</a></li>
        </ul>
    </body></html>"#;

    fn run(rule_type: RuleType, rule: &str, sample: &str) -> RuleTestResponse {
        RuleTester::new()
            .test_rule(&RuleTestRequest::new(rule_type, rule, sample))
            .unwrap()
    }

    #[test]
    fn test_css_text_and_attr() {
        let text = run(RuleType::Css, "ul.books a", PAGE);
        assert_eq!(text.extracted, vec!["Dune", "Emma"]);
        assert!(text.error.is_none());

        let hrefs = run(RuleType::Css, "ul.books a@href", PAGE);
        assert_eq!(hrefs.extracted, vec!["/b/1", "/b/2"]);
    }

    #[test]
    fn test_css_bad_selector_is_reported() {
        let response = run(RuleType::Css, "ul[[", PAGE);
        assert!(response.extracted.is_empty());
        assert!(response.error.unwrap().contains("selector"));
    }

    #[test]
    fn test_split_attr() {
        assert_eq!(split_attr("a@href"), ("a", Some("href")));
        assert_eq!(split_attr("img @data-src"), ("img", Some("data-src")));
        assert_eq!(split_attr("a"), ("a", None));
        assert_eq!(split_attr("@href"), ("@href", None));
        assert_eq!(split_attr("a[title='x@y.z']"), ("a[title='x@y.z']", None));
    }

    #[test]
    fn test_xpath_nodes_and_scalars() {
        let xml = "<toc><ch n='1'>Start</ch><ch n='2'>Middle</ch><ch n='3'>End</ch></toc>";
        assert_eq!(
            run(RuleType::Xpath, "/toc/ch", xml).extracted,
            vec!["Start", "Middle", "End"]
        );
        assert_eq!(run(RuleType::Xpath, "/toc/ch/@n", xml).extracted, vec!["1", "2", "3"]);
        assert_eq!(run(RuleType::Xpath, "count(/toc/ch)", xml).extracted, vec!["3"]);
    }

    #[test]
    fn test_xpath_over_html_sample() {
        let html = "<html><body><h1>Title</h1><br><p class=intro>x<p>y</body></html>";
        assert_eq!(run(RuleType::Xpath, "//h1/text()", html).extracted, vec!["Title"]);
        assert_eq!(
            run(RuleType::Xpath, "//p[@class='intro']", html).extracted,
            vec!["x"]
        );
        assert_eq!(run(RuleType::Xpath, "count(//p)", html).extracted, vec!["2"]);

        let fragment = run(RuleType::Xpath, "//a/@href", PAGE);
        assert_eq!(fragment.extracted, vec!["/b/1", "/b/2"]);
        assert!(fragment.error.is_none());
    }

    #[test]
    fn test_xpath_bad_expression() {
        let response = run(RuleType::Xpath, "//[", "<a/>");
        assert!(response.extracted.is_empty());
        assert!(response.error.unwrap().starts_with("xpath error"));
    }

    #[test]
    fn test_regex_group_or_whole_match() {
        let sample = "id=12; id=34; id=56";
        assert_eq!(
            run(RuleType::Regex, r"id=(\d+)", sample).extracted,
            vec!["12", "34", "56"]
        );
        assert_eq!(
            run(RuleType::Regex, r"id=\d+", sample).extracted,
            vec!["id=12", "id=34", "id=56"]
        );
        assert!(run(RuleType::Regex, "(unclosed", sample).error.is_some());
    }

    #[test]
    fn test_jsonpath() {
        let sample = r#"{"books":[{"name":"Dune","year":1965},{"name":"Emma","year":1815}]}"#;
        assert_eq!(
            run(RuleType::Jsonpath, "$.books[*].name", sample).extracted,
            vec!["Dune", "Emma"]
        );
        assert_eq!(
            run(RuleType::Jsonpath, "$.books[0].year", sample).extracted,
            vec!["1965"]
        );
        assert!(run(RuleType::Jsonpath, "$.books", "{not json").error.is_some());
    }

    #[test]
    fn test_unknown_rule_type_is_validation_error() {
        let request = RuleTestRequest {
            rule_type: "xquery".to_string(),
            rule: "//a".to_string(),
            sample: PAGE.to_string(),
        };
        match RuleTester::new().test_rule(&request) {
            Err(DebugError::Validation(message)) => assert!(message.contains("xquery")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rule_type_is_case_insensitive() {
        assert_eq!(" CSS ".parse::<RuleType>().unwrap(), RuleType::Css);
        assert_eq!("JsonPath".parse::<RuleType>().unwrap(), RuleType::Jsonpath);
    }

    #[test]
    fn test_empty_rule_rejected() {
        let request = RuleTestRequest::new(RuleType::Regex, "  ", "abc");
        assert!(matches!(
            RuleTester::new().test_rule(&request),
            Err(DebugError::Validation(_))
        ));
    }
}
