//! Integration tests for the lectern-daemon JSON-RPC API.
//!
//! Each test starts a real server on a free port and talks to it through
//! the jsonrpsee HTTP client. Pages are served by a `StaticFetcher`.

use anyhow::Result;
use jsonrpsee::core::client::{ClientT, Error as ClientError};
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use jsonrpsee::server::ServerHandle;
use jsonrpsee::types::error::INVALID_PARAMS_CODE;
use lectern_daemon::api::handlers::{SESSION_NOT_FOUND_CODE, SOURCE_NOT_FOUND_CODE};
use lectern_daemon::api::{start_server, ApiImpl};
use lectern_daemon::debug::{
    DebugSession, ExecuteRequest, ExecuteResponse, RuleTestRequest, RuleTestResponse,
    RuleType, SessionLogs, SessionStore,
};
use lectern_pipeline::{RulePipeline, SourceTestReport};
use lectern_runtime::{
    CapabilityPolicy, PolicyLevel, PoolConfig, RuntimeConfig, SandboxRuntime, TrustThresholds,
};
use lectern_source_core::{InMemoryCatalog, SourceCatalog, SourceDefinition, Stage, StaticFetcher};
use serde_json::json;
use std::sync::Arc;

// ============================================================================
// Test Utilities
// ============================================================================

const BASE: &str = "https://books.example/";

fn books_source() -> SourceDefinition {
    let mut source = SourceDefinition::new("books", "Books", BASE);
    source.trust_rating = 1;
    source.search_rule = r#"return {{ name = "Dune", itemUrl = "b/1" }}"#.to_string();
    source.item_info_rule =
        r#"return { intro = html.text(body, "p"), tocUrl = "b/1/toc" }"#.to_string();
    source.toc_rule = r#"return {{ title = "One", url = "c1" }}"#.to_string();
    source.content_rule = "return body".to_string();
    source
}

fn pages() -> StaticFetcher {
    StaticFetcher::new()
        .with_page("https://books.example/b/1", "<p>Spice</p>")
        .with_page("https://books.example/b/1/toc", "<ol></ol>")
        .with_page("https://books.example/c1", "Chapter one.")
}

/// Starts a JSON-RPC server for testing.
async fn start_test_server() -> Result<(HttpClient, ServerHandle)> {
    let runtime = |name: &str| {
        SandboxRuntime::new(PoolConfig::named(name), RuntimeConfig::default()).map(Arc::new)
    };
    let catalog: Arc<dyn SourceCatalog> = Arc::new(InMemoryCatalog::from_sources([books_source()]));

    let pipeline = RulePipeline::new(runtime("execution")?, Arc::new(pages()));
    let sessions = SessionStore::new(
        runtime("debug")?,
        Arc::clone(&catalog),
        TrustThresholds::default(),
        100,
    );
    let api = ApiImpl::new(Arc::new(sessions), Arc::new(pipeline), catalog);

    let (handle, addr) = start_server("127.0.0.1:0", api).await?;
    let client = HttpClientBuilder::default().build(format!("http://{}", addr))?;
    Ok((client, handle))
}

fn error_code(err: ClientError) -> i32 {
    match err {
        ClientError::Call(obj) => obj.code(),
        other => panic!("expected a call error, got {:?}", other),
    }
}

// ============================================================================
// Debug Sessions
// ============================================================================

#[tokio::test]
async fn test_debug_session_round_trip() -> Result<()> {
    let (client, handle) = start_test_server().await?;

    let session: DebugSession = client
        .request("debug.createSession", rpc_params![None::<String>])
        .await?;
    assert_eq!(
        session.policy,
        CapabilityPolicy::for_level(PolicyLevel::Standard)
    );

    let request = ExecuteRequest::new(
        "function shout(s) log.info('shouting ' .. s) return string.upper(s) end",
    )
    .call("shout", vec![json!("dune")]);
    let response: ExecuteResponse = client
        .request("debug.execute", rpc_params![session.session_id.clone(), request])
        .await?;
    assert!(response.success);
    assert_eq!(response.result, Some(json!("DUNE")));

    let logs: SessionLogs = client
        .request("debug.getLogs", rpc_params![session.session_id.clone()])
        .await?;
    assert_eq!(logs.logs.len(), 1);
    assert_eq!(logs.logs[0].message, "shouting dune");

    let cleared: usize = client
        .request("debug.clearLogs", rpc_params![session.session_id.clone()])
        .await?;
    assert_eq!(cleared, 1);
    let logs: SessionLogs = client
        .request("debug.getLogs", rpc_params![session.session_id])
        .await?;
    assert!(logs.logs.is_empty());

    handle.stop()?;
    Ok(())
}

#[tokio::test]
async fn test_bound_session_policy_and_violation() -> Result<()> {
    let (client, handle) = start_test_server().await?;

    let trusted: DebugSession = client
        .request("debug.createSession", rpc_params![Some("books")])
        .await?;
    assert_eq!(trusted.bound_source_id.as_deref(), Some("books"));
    assert_eq!(
        trusted.policy,
        CapabilityPolicy::for_level(PolicyLevel::Trusted)
    );

    let standard: DebugSession = client
        .request("debug.createSession", rpc_params![None::<String>])
        .await?;
    let response: ExecuteResponse = client
        .request(
            "debug.execute",
            rpc_params![standard.session_id, ExecuteRequest::new("return reflect.globals()")],
        )
        .await?;
    assert!(!response.success);
    assert_eq!(response.status, "policy_violation");
    assert!(response.error.unwrap().contains("reflection"));

    handle.stop()?;
    Ok(())
}

#[tokio::test]
async fn test_unknown_session_and_source() -> Result<()> {
    let (client, handle) = start_test_server().await?;

    let err = client
        .request::<SessionLogs, _>("debug.getLogs", rpc_params!["missing"])
        .await
        .unwrap_err();
    assert_eq!(error_code(err), SESSION_NOT_FOUND_CODE);

    let err = client
        .request::<DebugSession, _>("debug.createSession", rpc_params![Some("nope")])
        .await
        .unwrap_err();
    assert_eq!(error_code(err), SOURCE_NOT_FOUND_CODE);

    handle.stop()?;
    Ok(())
}

// ============================================================================
// Rule Testing
// ============================================================================

#[tokio::test]
async fn test_rule_over_rpc() -> Result<()> {
    let (client, handle) = start_test_server().await?;

    let request = RuleTestRequest::new(
        RuleType::Css,
        "a@href",
        r#"<a href="/one">1</a><a href="/two">2</a>"#,
    );
    let response: RuleTestResponse = client
        .request("debug.testRule", rpc_params![request])
        .await?;
    assert_eq!(response.extracted, vec!["/one", "/two"]);
    assert!(response.error.is_none());

    let unknown = RuleTestRequest {
        rule_type: "xquery".to_string(),
        rule: "//a".to_string(),
        sample: "<a/>".to_string(),
    };
    let err = client
        .request::<RuleTestResponse, _>("debug.testRule", rpc_params![unknown])
        .await
        .unwrap_err();
    assert_eq!(error_code(err), INVALID_PARAMS_CODE);

    handle.stop()?;
    Ok(())
}

// ============================================================================
// Source Testing
// ============================================================================

#[tokio::test]
async fn test_source_over_rpc() -> Result<()> {
    let (client, handle) = start_test_server().await?;

    let report: SourceTestReport = client
        .request("source.test", rpc_params!["books"])
        .await?;
    assert!(report.success(), "{:?}", report);
    assert_eq!(report.stages.len(), 4);
    assert_eq!(report.stage(Stage::TableOfContents).unwrap().count, 1);
    assert_eq!(
        report.stage(Stage::Content).unwrap().count,
        "Chapter one.".chars().count()
    );

    let err = client
        .request::<SourceTestReport, _>("source.test", rpc_params!["unknown"])
        .await
        .unwrap_err();
    assert_eq!(error_code(err), SOURCE_NOT_FOUND_CODE);

    handle.stop()?;
    Ok(())
}
