//! Error types for the extension helpers.

use thiserror::Error;

/// Errors returned by extension helpers.
///
/// Scripts never see these as raised errors; the bindings turn them into a
/// `(nil, message)` pair.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtensionError {
    /// Bad key, IV, mode or other argument.
    #[error("{0}")]
    Validation(String),

    /// Regular expression failed to compile.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// Input could not be decoded (base64, hex, percent-encoding).
    #[error("decode error: {0}")]
    Decode(String),

    /// JSON parsing, serialization or path error.
    #[error("json error: {0}")]
    Json(String),

    /// CSS selector failed to parse.
    #[error("invalid selector: {0}")]
    Selector(String),

    /// Date parsing or formatting error.
    #[error("date error: {0}")]
    Date(String),

    /// URL parsing or resolution error.
    #[error("url error: {0}")]
    Url(String),
}

impl From<serde_json::Error> for ExtensionError {
    fn from(err: serde_json::Error) -> Self {
        ExtensionError::Json(err.to_string())
    }
}

impl From<url::ParseError> for ExtensionError {
    fn from(err: url::ParseError) -> Self {
        ExtensionError::Url(err.to_string())
    }
}

/// Result type for extension helpers.
pub type ExtensionResult<T> = std::result::Result<T, ExtensionError>;
