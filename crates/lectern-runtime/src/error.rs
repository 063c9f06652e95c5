//! Error types for the Lectern runtime.
//!
//! Script faults are never errors here: they are reported as
//! [`ExecutionResult`](crate::ExecutionResult) variants. These types cover
//! construction and submission failures only.

use thiserror::Error;

/// Invalid policy or trust threshold values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Timeout must be positive.
    #[error("Invalid policy: timeout_ms must be greater than zero")]
    InvalidTimeout,

    /// Stack depth must be positive.
    #[error("Invalid policy: max_stack_depth must be greater than zero")]
    InvalidStackDepth,

    /// Instruction budget must be positive.
    #[error("Invalid policy: max_instruction_count must be greater than zero")]
    InvalidInstructionCount,

    /// Thresholds must satisfy `1 <= trusted_max <= compatible_max`.
    #[error("Invalid trust thresholds: trusted_max={trusted_max}, compatible_max={compatible_max}")]
    InvalidThresholds {
        trusted_max: i32,
        compatible_max: i32,
    },

    /// Unknown policy level name.
    #[error("Unknown policy level: {0}")]
    UnknownLevel(String),
}

/// Reasons an execution was not accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// Script source was empty or whitespace.
    #[error("Script code is empty")]
    EmptyCode,

    /// The pool queue was full and the pool was at its worker limit.
    #[error("Pool '{pool}' rejected execution: queue of {capacity} is full")]
    Rejected { pool: String, capacity: usize },

    /// The runtime is shutting down.
    #[error("Pool '{0}' is shut down")]
    ShutDown(String),
}

/// Errors that can occur while building a runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A worker thread could not be spawned.
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// Invalid policy configuration.
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Result type for runtime construction.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
