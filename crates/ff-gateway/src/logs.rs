// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-function invocation log rings feeding the `/logs` SSE stream.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Entries retained per function.
const LOG_CAPACITY: usize = 256;

/// One log line.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// When the line was recorded.
    pub timestamp: DateTime<Utc>,
    /// Severity label.
    pub level: String,
    /// The line itself.
    pub message: String,
}

/// Bounded per-function log buffers.
#[derive(Default)]
pub struct FunctionLogs {
    buffers: Mutex<HashMap<String, VecDeque<LogEntry>>>,
}

impl FunctionLogs {
    /// Empty buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line for `function_id`.
    pub fn push(&self, function_id: &str, level: &str, message: impl Into<String>) {
        let mut buffers = self.buffers.lock().expect("log lock poisoned");
        let buffer = buffers.entry(function_id.to_string()).or_default();
        if buffer.len() == LOG_CAPACITY {
            buffer.pop_front();
        }
        buffer.push_back(LogEntry {
            timestamp: Utc::now(),
            level: level.to_string(),
            message: message.into(),
        });
    }

    /// Recent lines for `function_id`, oldest first.
    #[must_use]
    pub fn recent(&self, function_id: &str) -> Vec<LogEntry> {
        self.buffers
            .lock()
            .expect("log lock poisoned")
            .get(function_id)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }
}
