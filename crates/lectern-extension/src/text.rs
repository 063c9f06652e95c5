//! String helpers (`str.*` in scripts). Indices count characters, not bytes.

pub fn trim(s: &str) -> String {
    s.trim().to_string()
}

/// Characters `[start, end)`, zero-based. Negative or out-of-range bounds are
/// clamped; `end` defaults to the string length.
pub fn substring(s: &str, start: i64, end: Option<i64>) -> String {
    let len = s.chars().count() as i64;
    let start = start.clamp(0, len);
    let end = end.unwrap_or(len).clamp(start, len);
    s.chars()
        .skip(start as usize)
        .take((end - start) as usize)
        .collect()
}

/// Text after the first `delimiter`, or an empty string.
pub fn substring_after(s: &str, delimiter: &str) -> String {
    s.split_once(delimiter)
        .map(|(_, after)| after.to_string())
        .unwrap_or_default()
}

/// Text before the first `delimiter`, or the whole string when absent.
pub fn substring_before(s: &str, delimiter: &str) -> String {
    s.split_once(delimiter)
        .map(|(before, _)| before.to_string())
        .unwrap_or_else(|| s.to_string())
}

/// Text between the first `open` and the next `close`, if both occur.
pub fn substring_between(s: &str, open: &str, close: &str) -> Option<String> {
    let (_, rest) = s.split_once(open)?;
    let (inner, _) = rest.split_once(close)?;
    Some(inner.to_string())
}

/// Split on a literal separator. An empty separator splits into characters.
pub fn split(s: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return s.chars().map(String::from).collect();
    }
    s.split(separator).map(str::to_string).collect()
}

pub fn join(parts: &[String], separator: &str) -> String {
    parts.join(separator)
}

pub fn starts_with(s: &str, prefix: &str) -> bool {
    s.starts_with(prefix)
}

pub fn ends_with(s: &str, suffix: &str) -> bool {
    s.ends_with(suffix)
}

pub fn contains(s: &str, needle: &str) -> bool {
    s.contains(needle)
}

pub fn lower(s: &str) -> String {
    s.to_lowercase()
}

pub fn upper(s: &str) -> String {
    s.to_uppercase()
}

/// Replace every literal occurrence of `from`.
pub fn replace(s: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return s.to_string();
    }
    s.replace(from, to)
}
