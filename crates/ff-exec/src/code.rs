// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tier 1: sandboxed code execution.
//!
//! The executor hands the artifact and input to the host's isolate/loader
//! binding and propagates whatever status user code reports; the sandbox
//! itself is an external collaborator.

use crate::bindings::CodeRuntime;
use crate::{ExecError, Execution, ExecutionMeta};
use ff_core::{FunctionKind, FunctionStub};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Executor-type label in `_meta`.
pub const EXECUTOR_TYPE: &str = "code-executor";

/// The tier-1 executor.
pub struct CodeExecutor {
    runtime: Option<Arc<dyn CodeRuntime>>,
}

impl CodeExecutor {
    /// Build over the (optional) sandbox binding.
    #[must_use]
    pub fn new(runtime: Option<Arc<dyn CodeRuntime>>) -> Self {
        Self { runtime }
    }

    /// Run `stub` with `input`.
    pub async fn execute(&self, stub: &FunctionStub, input: &Value) -> Result<Execution, ExecError> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or(ExecError::MissingBinding {
                binding: "code runtime",
            })?;

        let FunctionKind::Code(code) = &stub.metadata.kind else {
            return Err(ExecError::Backend {
                message: format!(
                    "code executor invoked for kind '{}'",
                    stub.metadata.kind.label()
                ),
            });
        };
        let artifact = stub.artifact.as_ref().ok_or(ExecError::MissingArtifact)?;

        let started = Instant::now();
        let response = runtime
            .invoke(artifact, &code.entry_point, input)
            .await
            .map_err(|e| ExecError::Backend { message: e.message })?;

        debug!(
            function = %stub.metadata.id,
            status = response.status,
            "code execution finished"
        );

        Ok(Execution {
            status: response.status,
            body: response.body,
            meta: ExecutionMeta::new(EXECUTOR_TYPE, 1, started.elapsed().as_millis() as u64),
        })
    }
}
