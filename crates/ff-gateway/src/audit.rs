// SPDX-License-Identifier: MIT OR Apache-2.0
//! Audit events for deploy and delete.
//!
//! Events go to the `audit` tracing target and into a bounded in-memory
//! ring so tests and operators can inspect recent activity. Credentials
//! never appear here; only sanitized key hints travel in `details`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::info;

/// Events retained in memory.
const AUDIT_CAPACITY: usize = 1_000;

/// One audit record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// When the action happened.
    pub timestamp: DateTime<Utc>,
    /// Acting principal, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Action label (`deploy`, `delete`, `rollback`).
    pub action: String,
    /// Affected resource (`function:<id>`).
    pub resource: String,
    /// Outcome (`success` / `failure`).
    pub status: String,
    /// Structured extras.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Client address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// Bounded audit ring.
#[derive(Default)]
pub struct AuditLog {
    events: Mutex<VecDeque<AuditEvent>>,
}

impl AuditLog {
    /// Empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event (emits to tracing and retains it).
    pub fn record(&self, event: AuditEvent) {
        info!(
            target: "audit",
            action = %event.action,
            resource = %event.resource,
            status = %event.status,
            user = event.user_id.as_deref().unwrap_or("-"),
            ip = event.ip.as_deref().unwrap_or("-"),
            "audit event"
        );
        let mut events = self.events.lock().expect("audit lock poisoned");
        if events.len() == AUDIT_CAPACITY {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Most recent events, newest last.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        let events = self.events.lock().expect("audit lock poisoned");
        events
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(action: &str) -> AuditEvent {
        AuditEvent {
            timestamp: Utc::now(),
            user_id: Some("user-1".into()),
            action: action.into(),
            resource: "function:sum".into(),
            status: "success".into(),
            details: Some(json!({"version": "1.0.0"})),
            ip: Some("10.0.0.1".into()),
        }
    }

    #[test]
    fn records_and_returns_recent() {
        let log = AuditLog::new();
        log.record(event("deploy"));
        log.record(event("delete"));

        let recent = log.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, "deploy");
        assert_eq!(recent[1].action, "delete");
    }

    #[test]
    fn ring_is_bounded() {
        let log = AuditLog::new();
        for _ in 0..(AUDIT_CAPACITY + 5) {
            log.record(event("deploy"));
        }
        assert_eq!(log.recent(usize::MAX).len(), AUDIT_CAPACITY);
    }
}
