//! JSON-RPC API handlers for lectern-daemon.
//!
//! Every method forwards to the debug harness or the rule pipeline; the only
//! work done here is mapping [`DebugError`] onto JSON-RPC error objects.

use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::error::{INTERNAL_ERROR_CODE, INVALID_PARAMS_CODE};
use jsonrpsee::types::ErrorObjectOwned;
use lectern_pipeline::{PipelineError, RulePipeline, SourceTestReport};
use lectern_runtime::SubmitError;
use lectern_source_core::SourceCatalog;
use std::sync::Arc;
use tracing::{info, warn};

use crate::debug::{
    DebugError, DebugSession, ExecuteRequest, ExecuteResponse, RuleTestRequest,
    RuleTestResponse, RuleTester, SessionLogs, SessionStore,
};

/// Application error codes, outside the range reserved by JSON-RPC.
pub const SESSION_NOT_FOUND_CODE: i32 = -32001;
pub const SOURCE_NOT_FOUND_CODE: i32 = -32002;
pub const BUSY_CODE: i32 = -32003;
pub const SOURCE_DISABLED_CODE: i32 = -32004;

/// The Lectern debug API.
///
/// This trait defines all available RPC methods that clients can call.
#[rpc(server)]
pub trait LecternApi {
    /// Open a debug session, optionally bound to a catalog source.
    #[method(name = "debug.createSession")]
    async fn create_session(&self, bound_source_id: Option<String>) -> RpcResult<DebugSession>;

    /// Run a script in a debug session.
    #[method(name = "debug.execute")]
    async fn execute(
        &self,
        session_id: String,
        request: ExecuteRequest,
    ) -> RpcResult<ExecuteResponse>;

    /// Evaluate a single extraction rule against a sample.
    #[method(name = "debug.testRule")]
    async fn test_rule(&self, request: RuleTestRequest) -> RpcResult<RuleTestResponse>;

    /// All log lines buffered for a session.
    #[method(name = "debug.getLogs")]
    async fn get_logs(&self, session_id: String) -> RpcResult<SessionLogs>;

    /// Empty a session's log buffer. Returns the number of lines removed.
    #[method(name = "debug.clearLogs")]
    async fn clear_logs(&self, session_id: String) -> RpcResult<usize>;

    /// Probe every stage of a catalog source.
    #[method(name = "source.test")]
    async fn test_source(&self, source_id: String) -> RpcResult<SourceTestReport>;
}

/// Implementation of the Lectern API.
pub struct ApiImpl {
    sessions: Arc<SessionStore>,
    rules: RuleTester,
    pipeline: Arc<RulePipeline>,
    catalog: Arc<dyn SourceCatalog>,
}

impl ApiImpl {
    pub fn new(
        sessions: Arc<SessionStore>,
        pipeline: Arc<RulePipeline>,
        catalog: Arc<dyn SourceCatalog>,
    ) -> Self {
        Self {
            sessions,
            rules: RuleTester::new(),
            pipeline,
            catalog,
        }
    }
}

impl From<DebugError> for ErrorObjectOwned {
    fn from(err: DebugError) -> Self {
        let code = match &err {
            DebugError::Validation(_) => INVALID_PARAMS_CODE,
            DebugError::SessionNotFound(_) => SESSION_NOT_FOUND_CODE,
            DebugError::SourceNotFound(_) => SOURCE_NOT_FOUND_CODE,
            DebugError::Submit(SubmitError::Rejected { .. })
            | DebugError::Pipeline(PipelineError::Submit(SubmitError::Rejected { .. })) => {
                BUSY_CODE
            }
            DebugError::Pipeline(PipelineError::SourceDisabled(_)) => SOURCE_DISABLED_CODE,
            DebugError::Submit(_) | DebugError::Pipeline(_) => INTERNAL_ERROR_CODE,
        };
        ErrorObjectOwned::owned(code, err.to_string(), None::<()>)
    }
}

#[jsonrpsee::core::async_trait]
impl LecternApiServer for ApiImpl {
    async fn create_session(&self, bound_source_id: Option<String>) -> RpcResult<DebugSession> {
        Ok(self.sessions.create_session(bound_source_id).await?)
    }

    async fn execute(
        &self,
        session_id: String,
        request: ExecuteRequest,
    ) -> RpcResult<ExecuteResponse> {
        Ok(self.sessions.execute(&session_id, request).await?)
    }

    async fn test_rule(&self, request: RuleTestRequest) -> RpcResult<RuleTestResponse> {
        let rules = self.rules;
        let response = tokio::task::spawn_blocking(move || rules.test_rule(&request))
            .await
            .map_err(|e| {
                warn!("Rule test task failed: {}", e);
                ErrorObjectOwned::owned(INTERNAL_ERROR_CODE, e.to_string(), None::<()>)
            })?;
        Ok(response?)
    }

    async fn get_logs(&self, session_id: String) -> RpcResult<SessionLogs> {
        Ok(self.sessions.get_logs(&session_id).await?)
    }

    async fn clear_logs(&self, session_id: String) -> RpcResult<usize> {
        Ok(self.sessions.clear_logs(&session_id).await?)
    }

    async fn test_source(&self, source_id: String) -> RpcResult<SourceTestReport> {
        let source = self
            .catalog
            .get(&source_id)
            .ok_or_else(|| DebugError::SourceNotFound(source_id.clone()))?;
        let report = self
            .pipeline
            .test_source(&source)
            .await
            .map_err(DebugError::from)?;
        info!(
            source = %source_id,
            success = report.success(),
            elapsed_ms = report.elapsed_ms,
            "Source test finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let validation: ErrorObjectOwned = DebugError::Validation("bad".into()).into();
        assert_eq!(validation.code(), INVALID_PARAMS_CODE);
        assert!(validation.message().contains("bad"));

        let missing: ErrorObjectOwned = DebugError::SessionNotFound("s".into()).into();
        assert_eq!(missing.code(), SESSION_NOT_FOUND_CODE);

        let busy: ErrorObjectOwned = DebugError::Submit(SubmitError::Rejected {
            pool: "debug".into(),
            capacity: 8,
        })
        .into();
        assert_eq!(busy.code(), BUSY_CODE);

        let disabled: ErrorObjectOwned =
            DebugError::Pipeline(PipelineError::SourceDisabled("x".into())).into();
        assert_eq!(disabled.code(), SOURCE_DISABLED_CODE);

        let stopped: ErrorObjectOwned =
            DebugError::Submit(SubmitError::ShutDown("d".into())).into();
        assert_eq!(stopped.code(), INTERNAL_ERROR_CODE);
    }
}
