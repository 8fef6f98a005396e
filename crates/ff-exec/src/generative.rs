// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tier 2: single-shot generation.
//!
//! Renders the function's user prompt by substituting `{{var}}`
//! placeholders with JSON-stringified input fields, sends one
//! `messages.create` request, and shapes the reply: parsed-and-validated
//! JSON when an output schema is configured, `{"output": <text>}`
//! otherwise.

use crate::bindings::{MessageRequest, ModelClient};
use crate::{ExecError, Execution, ExecutionMeta, shape_model_output};
use ff_core::{FunctionKind, FunctionStub};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Executor-type label in `_meta`.
pub const EXECUTOR_TYPE: &str = "generative-executor";

/// Model used when the function does not name one.
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";

/// The tier-2 executor.
pub struct GenerativeExecutor {
    client: Option<Arc<dyn ModelClient>>,
}

impl GenerativeExecutor {
    /// Build over the (optional) model binding.
    #[must_use]
    pub fn new(client: Option<Arc<dyn ModelClient>>) -> Self {
        Self { client }
    }

    /// Run `stub` with `input`.
    pub async fn execute(&self, stub: &FunctionStub, input: &Value) -> Result<Execution, ExecError> {
        let client = self.client.as_ref().ok_or(ExecError::MissingBinding {
            binding: "model client (messages.create)",
        })?;

        let FunctionKind::Generative(generative) = &stub.metadata.kind else {
            return Err(ExecError::Backend {
                message: format!(
                    "generative executor invoked for kind '{}'",
                    stub.metadata.kind.label()
                ),
            });
        };

        let started = Instant::now();
        let prompt = render_template(&generative.user_prompt, input);
        let model = generative
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        debug!(function = %stub.metadata.id, model = %model, "sending generation request");

        let response = client
            .create_message(MessageRequest {
                model,
                system: generative.system_prompt.clone(),
                prompt,
                temperature: generative.temperature,
                max_tokens: generative.max_tokens,
            })
            .await
            .map_err(|e| ExecError::Backend { message: e.message })?;

        let body = shape_model_output(&response.text, generative.output_schema.as_ref())?;

        let mut meta = ExecutionMeta::new(EXECUTOR_TYPE, 2, started.elapsed().as_millis() as u64);
        meta.generative_execution = Some(json!({
            "model": response.model,
            "tokens": { "input": response.tokens.input, "output": response.tokens.output },
            "stopReason": response.stop_reason,
        }));

        Ok(Execution {
            status: 200,
            body,
            meta,
        })
    }
}

/// Substitute `{{var}}` placeholders with the JSON serialization of the
/// matching input field. Fields without placeholders and placeholders
/// without fields are left alone.
#[must_use]
pub fn render_template(template: &str, input: &Value) -> String {
    let Some(fields) = input.as_object() else {
        return template.to_string();
    };
    let mut rendered = template.to_string();
    for (key, value) in fields {
        let placeholder = format!("{{{{{key}}}}}");
        if !rendered.contains(&placeholder) {
            continue;
        }
        let replacement = serde_json::to_string(value).unwrap_or_default();
        rendered = rendered.replace(&placeholder, &replacement);
    }
    rendered
}
