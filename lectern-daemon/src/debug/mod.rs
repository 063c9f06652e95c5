//! Debug and test harness.
//!
//! Two tools for source authors, both outside the rule pipeline:
//! - [`RuleTester`] evaluates one extraction rule (CSS, XPath, regex or
//!   JSONPath) against a sample document
//! - [`SessionStore`] runs ad-hoc scripts in debug sessions, each with its
//!   own capability policy and bounded log buffer
//!
//! This is also where execution results are turned into messages meant for
//! people rather than programs.

pub mod rules;
pub mod session;

pub use rules::{RuleTestRequest, RuleTestResponse, RuleTester, RuleType};
pub use session::{DebugSession, ExecuteRequest, ExecuteResponse, SessionLogs, SessionStore};

use lectern_pipeline::PipelineError;
use lectern_runtime::SubmitError;
use thiserror::Error;

/// Errors returned by the debug harness.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DebugError {
    /// The request itself is malformed.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Debug session not found: {0}")]
    SessionNotFound(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// The debug pool did not accept the execution.
    #[error(transparent)]
    Submit(SubmitError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl From<SubmitError> for DebugError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::EmptyCode => DebugError::Validation(err.to_string()),
            other => DebugError::Submit(other),
        }
    }
}

/// Result type for the debug harness.
pub type Result<T> = std::result::Result<T, DebugError>;
