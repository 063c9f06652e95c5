//! The sandbox runtime: submission, deadlines, results.

use crate::context::{ExecutionContext, ExecutionRequest};
use crate::error::{RuntimeResult, SubmitError};
use crate::interpreter::{self, ScriptJob};
use crate::policy::CapabilityPolicy;
use crate::pool::{CancelToken, OverflowPolicy, PoolConfig, WorkerPool};
use crate::result::{ExecutionOutcome, ExecutionResult};
use lectern_extension::{ExecutionLog, DEFAULT_LOG_CAPACITY};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Interpreter settings shared by every execution of a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Per-interpreter allocation cap. Zero disables the limit.
    pub memory_limit_bytes: usize,

    /// Log lines kept per execution.
    pub log_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 64 * 1024 * 1024,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

/// Trips the token when the awaiting future goes away early.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Executes scripts in fresh interpreters on a bounded worker pool.
pub struct SandboxRuntime {
    pool: WorkerPool,
    config: RuntimeConfig,
}

impl SandboxRuntime {
    pub fn new(pool: PoolConfig, config: RuntimeConfig) -> RuntimeResult<Self> {
        Ok(Self {
            pool: WorkerPool::new(pool)?,
            config,
        })
    }

    pub fn name(&self) -> &str {
        self.pool.name()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run `code` under `policy`.
    ///
    /// With `entry`, the chunk runs first and the named global function is
    /// then called with `args`; its return value is the result.
    pub async fn execute(
        &self,
        code: &str,
        entry: Option<&str>,
        context: ExecutionContext,
        policy: CapabilityPolicy,
        args: Vec<Value>,
    ) -> Result<ExecutionOutcome, SubmitError> {
        let mut request = ExecutionRequest::new(code, policy).with_context(context);
        if let Some(entry) = entry {
            request = request.with_entry(entry, args);
        }
        self.execute_request(request).await
    }

    /// Run a prepared request.
    ///
    /// Script faults never surface as `Err`: the error side only reports
    /// requests that were not accepted.
    pub async fn execute_request(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionOutcome, SubmitError> {
        if request.code.trim().is_empty() {
            return Err(SubmitError::EmptyCode);
        }

        let started = Instant::now();
        let deadline = started + Duration::from_millis(request.policy.timeout_ms());
        let log = ExecutionLog::new(request.context.label(), self.config.log_capacity);
        let cancel = CancelToken::new();
        let _guard = CancelOnDrop(cancel.clone());

        let job = ScriptJob {
            request,
            log: log.clone(),
            cancel: cancel.clone(),
            deadline,
            memory_limit: self.config.memory_limit_bytes,
        };
        let (tx, rx) = oneshot::channel();
        self.pool.submit(
            cancel.clone(),
            Box::new(move || {
                // The receiver is gone once the caller gave up.
                let _ = tx.send(interpreter::run(job));
            }),
        )?;

        let result =
            match tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) if cancel.is_cancelled() => ExecutionResult::Timeout,
                Ok(Err(_)) => {
                    warn!(pool = %self.pool.name(), "Execution worker dropped its result");
                    ExecutionResult::ScriptError("execution worker stopped unexpectedly".into())
                }
                Err(_) => {
                    cancel.cancel();
                    ExecutionResult::Timeout
                }
            };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            pool = %self.pool.name(),
            source = %log.label(),
            status = result.kind(),
            elapsed_ms,
            "Execution finished"
        );
        Ok(ExecutionOutcome {
            result,
            logs: log.entries(),
            elapsed_ms,
        })
    }

    /// Stop accepting work and cancel whatever is still running after
    /// `grace`. Returns the number of cancelled executions.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.pool.shutdown(grace).await
    }
}

/// Pool sizing for each runtime role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSetConfig {
    pub search: PoolConfig,
    pub execution: PoolConfig,
    pub debug: PoolConfig,
    pub runtime: RuntimeConfig,
}

impl Default for RuntimeSetConfig {
    fn default() -> Self {
        Self {
            search: PoolConfig {
                overflow: OverflowPolicy::CallerRuns,
                ..PoolConfig::named("search")
            },
            execution: PoolConfig::named("execution"),
            debug: PoolConfig {
                core_workers: 1,
                max_workers: 2,
                queue_capacity: 8,
                ..PoolConfig::named("debug")
            },
            runtime: RuntimeConfig::default(),
        }
    }
}

/// One runtime per logical role, each with its own pool.
#[derive(Clone)]
pub struct RuntimeSet {
    pub search: Arc<SandboxRuntime>,
    pub execution: Arc<SandboxRuntime>,
    pub debug: Arc<SandboxRuntime>,
}

impl RuntimeSet {
    pub fn new(config: RuntimeSetConfig) -> RuntimeResult<Self> {
        let runtime = config.runtime;
        Ok(Self {
            search: Arc::new(SandboxRuntime::new(config.search, runtime.clone())?),
            execution: Arc::new(SandboxRuntime::new(config.execution, runtime.clone())?),
            debug: Arc::new(SandboxRuntime::new(config.debug, runtime)?),
        })
    }

    /// Shut every pool down concurrently.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let (search, execution, debug) = tokio::join!(
            self.search.shutdown(grace),
            self.execution.shutdown(grace),
            self.debug.shutdown(grace),
        );
        search + execution + debug
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roles() {
        let config = RuntimeSetConfig::default();
        assert_eq!(config.search.overflow, OverflowPolicy::CallerRuns);
        assert_eq!(config.execution.overflow, OverflowPolicy::Reject);
        assert_eq!(config.debug.max_workers, 2);
        assert_eq!(config.runtime.memory_limit_bytes, 64 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_rejects_blank_code() {
        let runtime =
            SandboxRuntime::new(PoolConfig::named("t"), RuntimeConfig::default()).unwrap();
        let err = runtime
            .execute("  \n", None, ExecutionContext::new(), CapabilityPolicy::default(), vec![])
            .await
            .unwrap_err();
        assert_eq!(err, SubmitError::EmptyCode);
    }
}
