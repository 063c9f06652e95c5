//! Execution results.

use crate::policy::Capability;
use lectern_extension::LogEntry;
use serde::{Deserialize, Serialize};

/// Outcome of one script execution. Exactly one variant per execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ExecutionResult<T = serde_json::Value> {
    /// The script returned a value.
    Success(T),

    /// Syntax error, runtime error, missing entry function or exhausted
    /// stack/instruction budget. The message is never empty.
    ScriptError(String),

    /// The script touched a capability its policy denies.
    PolicyViolation(Capability),

    /// The deadline passed or the execution was cancelled.
    Timeout,
}

impl<T> ExecutionResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success(_))
    }

    /// The success value, if any.
    pub fn success(self) -> Option<T> {
        match self {
            ExecutionResult::Success(value) => Some(value),
            _ => None,
        }
    }

    /// Short machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionResult::Success(_) => "success",
            ExecutionResult::ScriptError(_) => "script_error",
            ExecutionResult::PolicyViolation(_) => "policy_violation",
            ExecutionResult::Timeout => "timeout",
        }
    }

    /// Transform the success value, keeping every failure as is.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ExecutionResult<U> {
        match self {
            ExecutionResult::Success(value) => ExecutionResult::Success(f(value)),
            ExecutionResult::ScriptError(message) => ExecutionResult::ScriptError(message),
            ExecutionResult::PolicyViolation(cap) => ExecutionResult::PolicyViolation(cap),
            ExecutionResult::Timeout => ExecutionResult::Timeout,
        }
    }

    /// Like [`map`](Self::map), but the transform may fail with a script error.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Result<U, String>) -> ExecutionResult<U> {
        match self {
            ExecutionResult::Success(value) => match f(value) {
                Ok(mapped) => ExecutionResult::Success(mapped),
                Err(message) => ExecutionResult::ScriptError(message),
            },
            ExecutionResult::ScriptError(message) => ExecutionResult::ScriptError(message),
            ExecutionResult::PolicyViolation(cap) => ExecutionResult::PolicyViolation(cap),
            ExecutionResult::Timeout => ExecutionResult::Timeout,
        }
    }
}

/// A result plus everything the script logged while producing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome<T = serde_json::Value> {
    pub result: ExecutionResult<T>,
    /// Log lines in emission order, including lines written before a timeout.
    pub logs: Vec<LogEntry>,
    pub elapsed_ms: u64,
}
