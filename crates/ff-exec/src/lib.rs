// SPDX-License-Identifier: MIT OR Apache-2.0
//! ff-exec
//!
//! The four tier executors and the injected binding seams they run
//! against. Executors take `(stub, input)` and produce an [`Execution`]:
//! status, body, and the `_meta` block the dispatcher merges into the
//! response. External services (the model backend, the host sandbox, the
//! human-task store, HTTP tool endpoints) are consumed through the traits
//! in [`bindings`]; a missing binding surfaces as a 503 naming it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Multi-step agent executor (tier 3).
pub mod agentic;
/// Injected service seams.
pub mod bindings;
/// Sandboxed-code executor (tier 1).
pub mod code;
/// Single-shot generation executor (tier 2).
pub mod generative;
/// Human-task executor (tier 4).
pub mod human;
/// Mock bindings for tests and local runs.
pub mod mock;

use ff_core::ErrorKind;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use agentic::{AgenticExecutor, DEFAULT_MAX_ITERATIONS};
pub use bindings::ExecutorBindings;
pub use code::CodeExecutor;
pub use generative::{DEFAULT_MODEL, GenerativeExecutor};
pub use human::HumanExecutor;

/// `_meta` block attached to every executor response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMeta {
    /// Which executor produced the response.
    pub executor_type: String,
    /// Numeric tier (1–4).
    pub tier: u8,
    /// Executor wall time, milliseconds.
    pub duration_ms: u64,
    /// Generative details (`model`, `tokens`, `stopReason`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generative_execution: Option<Value>,
    /// Agentic details (`model`, `iterations`, `toolsUsed`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agentic_execution: Option<Value>,
    /// Human-task details (mirrors the 202 body).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_execution: Option<Value>,
}

impl ExecutionMeta {
    /// Plain meta block with no tier-specific details.
    #[must_use]
    pub fn new(executor_type: impl Into<String>, tier: u8, duration_ms: u64) -> Self {
        Self {
            executor_type: executor_type.into(),
            tier,
            duration_ms,
            generative_execution: None,
            agentic_execution: None,
            human_execution: None,
        }
    }
}

/// A settled execution.
#[derive(Debug, Clone)]
pub struct Execution {
    /// HTTP status (user-code statuses propagate).
    pub status: u16,
    /// Response body before `_meta` merging.
    pub body: Value,
    /// The `_meta` block.
    pub meta: ExecutionMeta,
}

/// Executor failures, mapped onto the error taxonomy by the dispatcher.
#[derive(Debug, Error)]
pub enum ExecError {
    /// A required binding is absent from this deployment.
    #[error("required binding '{binding}' is not configured")]
    MissingBinding {
        /// Human name of the missing capability.
        binding: &'static str,
    },

    /// A code function has no artifact to run.
    #[error("code artifact is missing")]
    MissingArtifact,

    /// Inline tool handlers are rejected outright.
    #[error(
        "tool '{tool}' uses an inline handler, which is not supported for security reasons; \
         deploy the code as a function and reference it with an implementation of type 'function'"
    )]
    InlineToolRejected {
        /// The offending tool.
        tool: String,
    },

    /// The model reply could not be parsed as JSON while an output schema
    /// is configured.
    #[error("model output is not valid JSON: {reason}")]
    OutputNotJson {
        /// Parser detail.
        reason: String,
    },

    /// The parsed model reply does not satisfy the output schema.
    #[error("model output does not match outputSchema: {reason}")]
    OutputSchemaMismatch {
        /// First schema violation.
        reason: String,
    },

    /// The cumulative token budget was exhausted mid-run.
    #[error("token budget of {budget} exhausted ({used} tokens used)")]
    TokenBudgetExhausted {
        /// Configured budget.
        budget: u64,
        /// Tokens consumed when the run stopped.
        used: u64,
    },

    /// The agent hit its iteration bound without producing an answer.
    #[error("agent exhausted {iterations} iterations without a final answer")]
    NoFinalAnswer {
        /// Iterations consumed.
        iterations: u32,
    },

    /// The bound service failed.
    #[error("backend call failed: {message}")]
    Backend {
        /// Backend detail.
        message: String,
    },
}

impl ExecError {
    /// Taxonomy kind for the HTTP envelope.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingBinding { .. } => ErrorKind::ServiceUnavailable,
            Self::MissingArtifact => ErrorKind::NotFound,
            Self::InlineToolRejected { .. } => ErrorKind::NotImplemented,
            Self::OutputNotJson { .. }
            | Self::OutputSchemaMismatch { .. }
            | Self::TokenBudgetExhausted { .. }
            | Self::NoFinalAnswer { .. }
            | Self::Backend { .. } => ErrorKind::Invocation,
        }
    }
}

/// Validate `text` as JSON against an optional schema, producing the body
/// value shared by the generative and agentic executors.
pub(crate) fn shape_model_output(
    text: &str,
    output_schema: Option<&Value>,
) -> Result<Value, ExecError> {
    match output_schema {
        None => Ok(serde_json::json!({ "output": text })),
        Some(schema) => {
            let parsed: Value =
                serde_json::from_str(text.trim()).map_err(|e| ExecError::OutputNotJson {
                    reason: e.to_string(),
                })?;
            let validator =
                jsonschema::validator_for(schema).map_err(|e| ExecError::OutputSchemaMismatch {
                    reason: e.to_string(),
                })?;
            if let Some(violation) = validator.iter_errors(&parsed).next() {
                return Err(ExecError::OutputSchemaMismatch {
                    reason: violation.to_string(),
                });
            }
            Ok(parsed)
        }
    }
}
