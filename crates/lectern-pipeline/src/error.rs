use lectern_runtime::{PolicyError, SubmitError};
use thiserror::Error;

/// Reasons a stage could not be started. Everything that happens once a
/// stage runs is reported through [`PipelineResult`](crate::PipelineResult).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Source is disabled: {0}")]
    SourceDisabled(String),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}
