use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Invalid source '{id}': {reason}")]
    Invalid { id: String, reason: String },

    #[error("Failed to parse sources from {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Unsupported sources format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, SourceError>;

/// Failures of the fetch layer. The pipeline reports all of them as
/// upstream errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}
