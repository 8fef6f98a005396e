// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tier 4: human-in-the-loop tasks.
//!
//! The executor creates a pending task in the durable task store and
//! answers `202 Accepted` with the task handle; completion happens out of
//! band.

use crate::bindings::{HumanTaskService, NewHumanTask};
use crate::{ExecError, Execution, ExecutionMeta};
use chrono::{Duration as ChronoDuration, Utc};
use ff_core::{FunctionKind, FunctionStub};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Executor-type label in `_meta`.
pub const EXECUTOR_TYPE: &str = "human-executor";

/// Task lifetime when neither the store nor the SLA supplies one (24 h).
const DEFAULT_TASK_LIFETIME_MS: i64 = 24 * 60 * 60 * 1000;

/// The tier-4 executor.
pub struct HumanExecutor {
    service: Option<Arc<dyn HumanTaskService>>,
}

impl HumanExecutor {
    /// Build over the (optional) task-store binding.
    #[must_use]
    pub fn new(service: Option<Arc<dyn HumanTaskService>>) -> Self {
        Self { service }
    }

    /// Create the task for `stub` and answer 202.
    pub async fn execute(&self, stub: &FunctionStub, input: &Value) -> Result<Execution, ExecError> {
        let service = self.service.as_ref().ok_or(ExecError::MissingBinding {
            binding: "human task service",
        })?;

        let FunctionKind::Human(human) = &stub.metadata.kind else {
            return Err(ExecError::Backend {
                message: format!(
                    "human executor invoked for kind '{}'",
                    stub.metadata.kind.label()
                ),
            });
        };

        let started = Instant::now();
        let created = service
            .create_task(NewHumanTask {
                function_id: stub.metadata.id.clone(),
                interaction_type: human.interaction_type,
                ui: human.ui.clone(),
                assignees: human.assignees.clone(),
                input: input.clone(),
                sla: human.sla.clone(),
            })
            .await
            .map_err(|e| ExecError::Backend { message: e.message })?;

        let expires_at = created.expires_at.unwrap_or_else(|| {
            let lifetime = human
                .sla
                .as_ref()
                .map_or(DEFAULT_TASK_LIFETIME_MS, |sla| sla.timeout_ms as i64);
            Utc::now() + ChronoDuration::milliseconds(lifetime)
        });

        info!(
            function = %stub.metadata.id,
            task_id = %created.task_id,
            "human task created"
        );

        let detail = json!({
            "taskId": created.task_id,
            "taskUrl": created.task_url,
            "taskStatus": "pending",
            "expiresAt": expires_at.to_rfc3339(),
        });

        let mut meta = ExecutionMeta::new(EXECUTOR_TYPE, 4, started.elapsed().as_millis() as u64);
        meta.human_execution = Some(detail.clone());

        Ok(Execution {
            status: 202,
            body: detail,
            meta,
        })
    }
}
