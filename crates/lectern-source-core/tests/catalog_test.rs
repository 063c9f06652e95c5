//! Integration tests for loading source catalogs from disk.

use lectern_runtime::{CapabilityPolicy, PolicyLevel, TrustThresholds};
use lectern_source_core::{load_sources, InMemoryCatalog, SourceCatalog, SourceError, Stage};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_temp(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_toml_sources() {
    let file = write_temp(
        ".toml",
        r#"
[[source]]
id = "novels"
name = "Novels"
baseUrl = "https://novels.example"
trustRating = 3
searchUrl = "/search?q={{key}}&p={{page}}"
searchRule = "return json.parse(body)"

[[source]]
id = "local"
name = "Local"
baseUrl = "https://local.example"
enabled = false
policyOverride = { allowFileAccess = true, timeoutMs = 500 }
"#,
    );

    let catalog = InMemoryCatalog::from_path(file.path()).unwrap();
    assert_eq!(catalog.len(), 2);

    let novels = catalog.get("novels").unwrap();
    assert!(novels.enabled);
    assert_eq!(novels.rule(Stage::Search), "return json.parse(body)");
    assert_eq!(
        novels.policy(&TrustThresholds::default()),
        CapabilityPolicy::for_level(PolicyLevel::Compatible)
    );

    let local = catalog.get("local").unwrap();
    assert!(!local.enabled);
    let policy = local.policy(&TrustThresholds::default());
    assert!(policy.file_access());
    assert!(!policy.socket_access());
    assert_eq!(policy.timeout_ms(), 500);
}

#[test]
fn test_load_json_sources() {
    let file = write_temp(
        ".json",
        r#"[{"id": "a", "name": "A", "baseUrl": "https://a.example", "weight": 5}]"#,
    );
    let sources = load_sources(file.path()).unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].weight, 5);
}

#[test]
fn test_invalid_policy_override_is_a_parse_error() {
    let file = write_temp(
        ".json",
        r#"[{"id": "a", "name": "A", "baseUrl": "https://a.example",
             "policyOverride": {"timeoutMs": 0}}]"#,
    );
    assert!(matches!(
        load_sources(file.path()),
        Err(SourceError::Parse { .. })
    ));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = load_sources(&dir.path().join("absent.json"));
    assert!(matches!(result, Err(SourceError::Io(_))));
}
