//! # lectern-extension
//!
//! Helper library exposed to Lectern source scripts.
//!
//! This crate provides:
//! - Pure Rust helpers grouped by namespace (`codec`, `hash`, `crypto`, `re`,
//!   `str`, `list`, `json`, `html`, `date`)
//! - A per-execution log stream (`log.*` in scripts)
//! - A static, versioned registration table that binds every helper into a
//!   fresh interpreter
//!
//! ## Script conventions
//!
//! Helpers never raise on bad input. Fallible helpers return `(nil, message)`
//! so a script can branch on the second value:
//!
//! ```lua
//! local plain, err = crypto.aes_decrypt(data, key, iv)
//! if err then log.warn("decrypt failed", err) end
//! ```

pub mod codec;
pub mod crypto;
pub mod date;
pub mod error;
pub mod hash;
pub mod host;
pub mod html;
pub mod json;
pub mod list;
pub mod log;
pub mod pattern;
pub mod text;

pub use error::{ExtensionError, ExtensionResult};
pub use host::{install, ExtensionFn, EXTENSIONS, EXTENSION_API_VERSION};
pub use log::{ExecutionLog, LogEntry, LogLevel, DEFAULT_LOG_CAPACITY};
