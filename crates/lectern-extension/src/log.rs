//! Per-execution log stream.
//!
//! Scripts write through `log.info(...)` and friends. Each call appends a
//! [`LogEntry`] to the [`ExecutionLog`] installed for the current execution
//! and mirrors the line to `tracing`. The buffer is bounded: past capacity the
//! oldest entries are dropped and counted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Entries kept per execution before the oldest are dropped.
pub const DEFAULT_LOG_CAPACITY: usize = 1_000;

/// Log level for script logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// A single line emitted by a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

struct Buffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    dropped: u64,
}

/// Bounded, append-only log buffer shared between a caller and one execution.
///
/// Cloning yields another handle to the same buffer.
#[derive(Clone)]
pub struct ExecutionLog {
    label: Arc<str>,
    inner: Arc<Mutex<Buffer>>,
}

impl ExecutionLog {
    /// Create a buffer. `label` identifies the source in mirrored tracing
    /// events.
    pub fn new(label: impl Into<String>, capacity: usize) -> Self {
        Self {
            label: Arc::from(label.into()),
            inner: Arc::new(Mutex::new(Buffer {
                entries: VecDeque::new(),
                capacity: capacity.max(1),
                dropped: 0,
            })),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn lock(&self) -> MutexGuard<'_, Buffer> {
        // A panicking writer cannot leave the deque half-updated.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an entry and mirror it to `tracing`.
    pub fn record(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) {
        let entry = LogEntry {
            level,
            message: message.into(),
            data,
            timestamp: Utc::now(),
        };
        mirror(&self.label, &entry);
        self.push(entry);
    }

    /// Append an existing entry without mirroring it.
    pub fn push(&self, entry: LogEntry) {
        let mut buffer = self.lock();
        if buffer.entries.len() >= buffer.capacity {
            buffer.entries.pop_front();
            buffer.dropped += 1;
        }
        buffer.entries.push_back(entry);
    }

    pub fn extend(&self, entries: impl IntoIterator<Item = LogEntry>) {
        for entry in entries {
            self.push(entry);
        }
    }

    /// Snapshot of the current entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    /// Number of entries dropped because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Remove every entry and reset the drop counter.
    pub fn clear(&self) {
        let mut buffer = self.lock();
        buffer.entries.clear();
        buffer.dropped = 0;
    }
}

impl std::fmt::Debug for ExecutionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionLog")
            .field("label", &self.label)
            .field("len", &self.len())
            .finish()
    }
}

fn mirror(label: &str, entry: &LogEntry) {
    match entry.level {
        LogLevel::Debug => tracing::debug!(source = %label, "{}", entry.message),
        LogLevel::Info => tracing::info!(source = %label, "{}", entry.message),
        LogLevel::Warn => tracing::warn!(source = %label, "{}", entry.message),
        LogLevel::Error => tracing::error!(source = %label, "{}", entry.message),
    }
}
