//! Debug sessions: ad-hoc script runs with per-session logs.
//!
//! A session is created on demand and keyed by an opaque id. Its policy is
//! fixed at creation: the bound source's policy, or the standard level when
//! no source is bound. Script logs from every execution are appended to the
//! session's bounded buffer until they are cleared explicitly. Sessions that
//! stay idle past a threshold are removed by [`SessionStore::expire_idle`].

use super::{DebugError, Result};
use chrono::{DateTime, Utc};
use lectern_extension::{ExecutionLog, LogEntry};
use lectern_runtime::{
    CapabilityPolicy, ExecutionContext, ExecutionResult, PolicyLevel, SandboxRuntime,
    TrustThresholds,
};
use lectern_source_core::SourceCatalog;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Public view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSession {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_source_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub policy: CapabilityPolicy,
}

/// Script to run inside a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub code: String,
    /// Global function to call after the chunk runs.
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    /// Globals for the run. The bound source is added as `source` when the
    /// context does not set one.
    #[serde(default)]
    pub context: Option<ExecutionContext>,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    pub fn call(mut self, function: impl Into<String>, args: Vec<Value>) -> Self {
        self.function = Some(function.into());
        self.args = args;
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Outcome of one session execution, phrased for a person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub success: bool,
    /// `success`, `script_error`, `policy_violation` or `timeout`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Lines logged by this execution only.
    pub logs: Vec<LogEntry>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLogs {
    pub logs: Vec<LogEntry>,
    /// Lines dropped because the buffer was full.
    pub dropped: u64,
}

struct Session {
    info: DebugSession,
    source_view: Option<Value>,
    log: ExecutionLog,
    last_context: Option<ExecutionContext>,
}

/// Owns every live debug session.
pub struct SessionStore {
    runtime: Arc<SandboxRuntime>,
    catalog: Arc<dyn SourceCatalog>,
    thresholds: TrustThresholds,
    log_capacity: usize,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(
        runtime: Arc<SandboxRuntime>,
        catalog: Arc<dyn SourceCatalog>,
        thresholds: TrustThresholds,
        log_capacity: usize,
    ) -> Self {
        Self {
            runtime,
            catalog,
            thresholds,
            log_capacity: log_capacity.max(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Open a session, optionally bound to a catalog source.
    pub async fn create_session(&self, bound_source_id: Option<String>) -> Result<DebugSession> {
        let (policy, source_view) = match &bound_source_id {
            Some(id) => {
                let source = self
                    .catalog
                    .get(id)
                    .ok_or_else(|| DebugError::SourceNotFound(id.clone()))?;
                (source.policy(&self.thresholds), Some(source.public_view()))
            }
            None => (CapabilityPolicy::for_level(PolicyLevel::Standard), None),
        };

        let now = Utc::now();
        let session_id = uuid::Uuid::new_v4().to_string();
        let info = DebugSession {
            session_id: session_id.clone(),
            bound_source_id,
            created_at: now,
            last_active_at: now,
            policy,
        };
        let session = Session {
            info: info.clone(),
            source_view,
            log: ExecutionLog::new(format!("debug:{}", session_id), self.log_capacity),
            last_context: None,
        };
        self.sessions.write().await.insert(session_id.clone(), session);

        info!(
            session = %session_id,
            source = info.bound_source_id.as_deref().unwrap_or("-"),
            "Created debug session"
        );
        Ok(info)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<DebugSession> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|session| session.info.clone())
            .ok_or_else(|| DebugError::SessionNotFound(session_id.to_string()))
    }

    /// Run a script on the debug runtime under the session's policy.
    pub async fn execute(
        &self,
        session_id: &str,
        request: ExecuteRequest,
    ) -> Result<ExecuteResponse> {
        let (policy, log, context) = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| DebugError::SessionNotFound(session_id.to_string()))?;
            session.info.last_active_at = Utc::now();

            let mut context = request.context.unwrap_or_default();
            if context.source.is_none() {
                context.source = session.source_view.clone();
            }
            session.last_context = Some(context.clone());
            (session.info.policy.clone(), session.log.clone(), context)
        };

        let timeout_ms = policy.timeout_ms();
        let outcome = self
            .runtime
            .execute(
                &request.code,
                request.function.as_deref(),
                context,
                policy,
                request.args,
            )
            .await?;

        log.extend(outcome.logs.iter().cloned());
        debug!(
            session = %session_id,
            status = outcome.result.kind(),
            elapsed_ms = outcome.elapsed_ms,
            "Debug execution finished"
        );

        let status = outcome.result.kind().to_string();
        let (result, error) = match outcome.result {
            ExecutionResult::Success(value) => (Some(value), None),
            failure => (None, Some(describe_failure(&failure, timeout_ms))),
        };
        Ok(ExecuteResponse {
            success: error.is_none(),
            status,
            result,
            error,
            logs: outcome.logs,
            execution_time_ms: outcome.elapsed_ms,
        })
    }

    pub async fn get_logs(&self, session_id: &str) -> Result<SessionLogs> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| DebugError::SessionNotFound(session_id.to_string()))?;
        Ok(SessionLogs {
            logs: session.log.entries(),
            dropped: session.log.dropped(),
        })
    }

    /// Empty the session's log buffer. Returns the number of lines removed.
    pub async fn clear_logs(&self, session_id: &str) -> Result<usize> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| DebugError::SessionNotFound(session_id.to_string()))?;
        let cleared = session.log.len();
        session.log.clear();
        Ok(cleared)
    }

    /// Context of the most recent execution in the session.
    pub async fn last_context(&self, session_id: &str) -> Result<Option<ExecutionContext>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|session| session.last_context.clone())
            .ok_or_else(|| DebugError::SessionNotFound(session_id.to_string()))
    }

    pub async fn remove_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        if removed {
            info!(session = %session_id, "Removed debug session");
        }
        removed
    }

    /// Drop sessions idle for longer than `threshold`. Returns how many were
    /// removed.
    pub async fn expire_idle(&self, threshold: Duration) -> usize {
        let threshold = match chrono::Duration::from_std(threshold) {
            Ok(threshold) => threshold,
            Err(e) => {
                warn!("Ignoring idle threshold out of range: {}", e);
                return 0;
            }
        };
        let cutoff = Utc::now() - threshold;

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.info.last_active_at > cutoff);
        let expired = before - sessions.len();
        if expired > 0 {
            info!(expired, remaining = sessions.len(), "Expired idle debug sessions");
        }
        expired
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// User-facing message for a failed execution.
pub fn describe_failure(result: &ExecutionResult, timeout_ms: u64) -> String {
    match result {
        ExecutionResult::Success(_) => "Script completed".to_string(),
        ExecutionResult::ScriptError(message) => format!("Script error: {}", message),
        ExecutionResult::PolicyViolation(capability) => format!(
            "Policy violation: {} access is not permitted for this session",
            capability
        ),
        ExecutionResult::Timeout => format!("Script timed out after {} ms", timeout_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_runtime::{Capability, PoolConfig, RuntimeConfig};
    use lectern_source_core::{InMemoryCatalog, SourceDefinition};
    use serde_json::json;

    fn store(capacity: usize) -> SessionStore {
        let runtime =
            SandboxRuntime::new(PoolConfig::named("debug"), RuntimeConfig::default()).unwrap();
        let mut trusted = SourceDefinition::new("trusted", "Trusted", "https://t.example/");
        trusted.trust_rating = 1;
        let catalog = InMemoryCatalog::from_sources([trusted]);
        SessionStore::new(
            Arc::new(runtime),
            Arc::new(catalog),
            TrustThresholds::default(),
            capacity,
        )
    }

    #[tokio::test]
    async fn test_unbound_session_is_standard() {
        let store = store(10);
        let session = store.create_session(None).await.unwrap();
        assert_eq!(session.policy, CapabilityPolicy::for_level(PolicyLevel::Standard));
        assert!(session.bound_source_id.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_bound_session_uses_source_policy() {
        let store = store(10);
        let session = store.create_session(Some("trusted".into())).await.unwrap();
        assert_eq!(session.policy, CapabilityPolicy::for_level(PolicyLevel::Trusted));

        let response = store
            .execute(&session.session_id, ExecuteRequest::new("return source.id"))
            .await
            .unwrap();
        assert_eq!(response.result, Some(json!("trusted")));
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let store = store(10);
        let err = store.create_session(Some("missing".into())).await.unwrap_err();
        assert_eq!(err, DebugError::SourceNotFound("missing".into()));
    }

    #[tokio::test]
    async fn test_execute_function_collects_logs() {
        let store = store(10);
        let session = store.create_session(None).await.unwrap();
        let request = ExecuteRequest::new(
            "function add(a, b) log.info('adding', {a = a, b = b}) return a + b end",
        )
        .call("add", vec![json!(2), json!(3)]);

        let response = store.execute(&session.session_id, request).await.unwrap();
        assert!(response.success);
        assert_eq!(response.status, "success");
        assert_eq!(response.result, Some(json!(5)));
        assert_eq!(response.logs.len(), 1);

        let logs = store.get_logs(&session.session_id).await.unwrap();
        assert_eq!(logs.logs[0].message, "adding");
        assert_eq!(logs.dropped, 0);
    }

    #[tokio::test]
    async fn test_logs_are_bounded_and_clearable() {
        let store = store(3);
        let session = store.create_session(None).await.unwrap();
        store
            .execute(
                &session.session_id,
                ExecuteRequest::new("for i = 1, 5 do print('line ' .. i) end"),
            )
            .await
            .unwrap();

        let logs = store.get_logs(&session.session_id).await.unwrap();
        let messages: Vec<_> = logs.logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["line 3", "line 4", "line 5"]);
        assert_eq!(logs.dropped, 2);

        assert_eq!(store.clear_logs(&session.session_id).await.unwrap(), 3);
        let logs = store.get_logs(&session.session_id).await.unwrap();
        assert!(logs.logs.is_empty());
        assert_eq!(logs.dropped, 0);
    }

    #[tokio::test]
    async fn test_failures_are_translated() {
        let store = store(10);
        let session = store.create_session(None).await.unwrap();

        let denied = store
            .execute(
                &session.session_id,
                ExecuteRequest::new("return socket.connect('localhost', 1)"),
            )
            .await
            .unwrap();
        assert!(!denied.success);
        assert_eq!(denied.status, "policy_violation");
        assert_eq!(
            denied.error.as_deref(),
            Some("Policy violation: socket access is not permitted for this session")
        );

        let broken = store
            .execute(&session.session_id, ExecuteRequest::new("error('boom')"))
            .await
            .unwrap();
        assert!(broken.error.unwrap().starts_with("Script error:"));
    }

    #[test]
    fn test_describe_timeout() {
        assert_eq!(
            describe_failure(&ExecutionResult::Timeout, 250),
            "Script timed out after 250 ms"
        );
        assert!(describe_failure(&ExecutionResult::PolicyViolation(Capability::File), 1)
            .contains("file"));
    }

    #[tokio::test]
    async fn test_last_context_recorded() {
        let store = store(10);
        let session = store.create_session(None).await.unwrap();
        assert_eq!(store.last_context(&session.session_id).await.unwrap(), None);

        let context = ExecutionContext::new().with_item(json!({"name": "Dune"}));
        store
            .execute(
                &session.session_id,
                ExecuteRequest::new("return item.name").with_context(context.clone()),
            )
            .await
            .unwrap();
        assert_eq!(
            store.last_context(&session.session_id).await.unwrap(),
            Some(context)
        );
    }

    #[tokio::test]
    async fn test_empty_code_and_unknown_session() {
        let store = store(10);
        let session = store.create_session(None).await.unwrap();
        let err = store
            .execute(&session.session_id, ExecuteRequest::new("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, DebugError::Validation(_)));

        let err = store.execute("nope", ExecuteRequest::new("return 1")).await.unwrap_err();
        assert_eq!(err, DebugError::SessionNotFound("nope".into()));
    }

    #[tokio::test]
    async fn test_expire_and_remove() {
        let store = store(10);
        let idle = store.create_session(None).await.unwrap();
        let active = store.create_session(None).await.unwrap();

        assert_eq!(store.expire_idle(Duration::from_secs(60)).await, 0);
        tokio::time::sleep(Duration::from_millis(300)).await;
        store
            .execute(&active.session_id, ExecuteRequest::new("return 1"))
            .await
            .unwrap();
        assert_eq!(store.expire_idle(Duration::from_millis(200)).await, 1);
        assert!(store.get_session(&idle.session_id).await.is_err());
        assert!(store.remove_session(&active.session_id).await);
        assert!(!store.remove_session(&active.session_id).await);
        assert!(store.is_empty().await);
    }
}
