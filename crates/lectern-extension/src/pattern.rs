//! Regular expressions (`re.*` in scripts).
//!
//! Patterns use the `regex` crate syntax. A pattern that fails to compile is
//! reported as [`ExtensionError::InvalidPattern`], never a fault.

use crate::error::{ExtensionError, ExtensionResult};
use regex::Regex;
use serde::Serialize;

/// First match of a pattern with its capture groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternMatch {
    /// Whole matched text.
    #[serde(rename = "match")]
    pub matched: String,
    /// Capture groups in order; groups that did not participate are empty.
    pub groups: Vec<String>,
    /// Byte offset of the match start.
    pub start: usize,
}

fn compile(pattern: &str) -> ExtensionResult<Regex> {
    Regex::new(pattern).map_err(|e| ExtensionError::InvalidPattern(e.to_string()))
}

pub fn is_match(text: &str, pattern: &str) -> ExtensionResult<bool> {
    Ok(compile(pattern)?.is_match(text))
}

/// First match and its captures, or `None`.
pub fn first_match(text: &str, pattern: &str) -> ExtensionResult<Option<PatternMatch>> {
    let re = compile(pattern)?;
    Ok(re.captures(text).map(|caps| {
        let whole = caps.get(0);
        PatternMatch {
            matched: whole.map(|m| m.as_str().to_string()).unwrap_or_default(),
            groups: caps
                .iter()
                .skip(1)
                .map(|group| group.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
            start: whole.map(|m| m.start()).unwrap_or_default(),
        }
    }))
}

/// Every non-overlapping match, in order.
pub fn match_all(text: &str, pattern: &str) -> ExtensionResult<Vec<String>> {
    let re = compile(pattern)?;
    Ok(re.find_iter(text).map(|m| m.as_str().to_string()).collect())
}

/// Replace matches. `$1` / `${name}` in `replacement` expand capture groups.
pub fn replace(
    text: &str,
    pattern: &str,
    replacement: &str,
    all: bool,
) -> ExtensionResult<String> {
    let re = compile(pattern)?;
    let replaced = if all {
        re.replace_all(text, replacement)
    } else {
        re.replace(text, replacement)
    };
    Ok(replaced.into_owned())
}

pub fn split(text: &str, pattern: &str) -> ExtensionResult<Vec<String>> {
    let re = compile(pattern)?;
    Ok(re.split(text).map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pattern() {
        let err = is_match("abc", "(unclosed").unwrap_err();
        assert!(matches!(err, ExtensionError::InvalidPattern(_)));
        assert!(err.to_string().starts_with("invalid pattern: "));
    }

    #[test]
    fn test_first_match_groups() {
        let found = first_match("vol 3 ch 12", r"ch (\d+)(x)?").unwrap().unwrap();
        assert_eq!(found.matched, "ch 12");
        assert_eq!(found.groups, vec!["12".to_string(), String::new()]);
        assert_eq!(found.start, 6);
        assert!(first_match("none", r"\d").unwrap().is_none());
    }

    #[test]
    fn test_replace_and_split() {
        assert_eq!(replace("a1b2", r"\d", "#", true).unwrap(), "a#b#");
        assert_eq!(replace("a1b2", r"\d", "#", false).unwrap(), "a#b2");
        assert_eq!(replace("x=1", r"(\w)=(\d)", "$2=$1", true).unwrap(), "1=x");
        assert_eq!(split("a, b,c", r",\s*").unwrap(), vec!["a", "b", "c"]);
        assert_eq!(match_all("a1b22", r"\d+").unwrap(), vec!["1", "22"]);
    }
}
