//! Stage results.

use lectern_extension::LogEntry;
use lectern_runtime::{Capability, ExecutionResult};
use lectern_source_core::Stage;
use serde::{Deserialize, Serialize};

/// Outcome of one stage: the sandbox outcome plus upstream fetch failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum PipelineResult<T> {
    Success(T),
    ScriptError(String),
    PolicyViolation(Capability),
    Timeout,
    /// The page the stage needed could not be fetched.
    UpstreamError(String),
}

impl<T> PipelineResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineResult::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            PipelineResult::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_success(&self) -> Option<&T> {
        match self {
            PipelineResult::Success(value) => Some(value),
            _ => None,
        }
    }

    /// The success value, or the failure re-typed for another stage.
    pub fn into_success<U>(self) -> Result<T, PipelineResult<U>> {
        match self {
            PipelineResult::Success(value) => Ok(value),
            PipelineResult::ScriptError(message) => Err(PipelineResult::ScriptError(message)),
            PipelineResult::PolicyViolation(capability) => {
                Err(PipelineResult::PolicyViolation(capability))
            }
            PipelineResult::Timeout => Err(PipelineResult::Timeout),
            PipelineResult::UpstreamError(message) => Err(PipelineResult::UpstreamError(message)),
        }
    }

    /// Human-readable failure, `None` on success.
    pub fn error_message(&self) -> Option<String> {
        match self {
            PipelineResult::Success(_) => None,
            PipelineResult::ScriptError(message) => Some(format!("script error: {}", message)),
            PipelineResult::PolicyViolation(capability) => {
                Some(format!("policy violation: {} access denied", capability))
            }
            PipelineResult::Timeout => Some("timed out".to_string()),
            PipelineResult::UpstreamError(message) => Some(format!("upstream error: {}", message)),
        }
    }

    /// Transform the success value; a failed transform is a script error.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Result<U, String>) -> PipelineResult<U> {
        match self {
            PipelineResult::Success(value) => match f(value) {
                Ok(mapped) => PipelineResult::Success(mapped),
                Err(message) => PipelineResult::ScriptError(message),
            },
            PipelineResult::ScriptError(message) => PipelineResult::ScriptError(message),
            PipelineResult::PolicyViolation(capability) => {
                PipelineResult::PolicyViolation(capability)
            }
            PipelineResult::Timeout => PipelineResult::Timeout,
            PipelineResult::UpstreamError(message) => PipelineResult::UpstreamError(message),
        }
    }
}

impl<T> From<ExecutionResult<T>> for PipelineResult<T> {
    fn from(result: ExecutionResult<T>) -> Self {
        match result {
            ExecutionResult::Success(value) => PipelineResult::Success(value),
            ExecutionResult::ScriptError(message) => PipelineResult::ScriptError(message),
            ExecutionResult::PolicyViolation(capability) => {
                PipelineResult::PolicyViolation(capability)
            }
            ExecutionResult::Timeout => PipelineResult::Timeout,
        }
    }
}

/// A stage result with its timing and script logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult<T> {
    pub stage: Stage,
    pub result: PipelineResult<T>,
    pub elapsed_ms: u64,
    pub logs: Vec<LogEntry>,
}

impl<T> StageResult<T> {
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Result<U, String>) -> StageResult<U> {
        StageResult {
            stage: self.stage,
            result: self.result.and_then(f),
            elapsed_ms: self.elapsed_ms,
            logs: self.logs,
        }
    }
}
