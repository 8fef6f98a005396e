// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tier 3: the agent loop.
//!
//! Tools are registered through a factory keyed by implementation type:
//! `builtin` (the fixed web_search/web_fetch set), `api` (HTTP POST JSON),
//! `function` (nested dispatch by id). Inline code-string handlers are
//! rejected outright; callers must deploy the code as a function and
//! reference it by id. The loop chats with the model, dispatches requested
//! tool calls, feeds results back, and stops at the first tool-free reply
//! or at the iteration bound.
//!
//! Executor instances are cached per function id by the dispatcher, so the
//! tool registry is built once per deployment.

use crate::bindings::{
    BuiltinTools, ChatMessage, ChatRequest, ExecutorBindings, FunctionInvoker, HttpToolClient,
    MessageRole, ModelClient, ToolCall, ToolDescriptor,
};
use crate::generative::DEFAULT_MODEL;
use crate::{ExecError, Execution, ExecutionMeta, shape_model_output};
use ff_core::{AgenticFunction, ToolImplementation};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Executor-type label in `_meta`.
pub const EXECUTOR_TYPE: &str = "agentic-executor";

/// Iteration bound applied when the function does not declare one.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

enum ToolHandler {
    Builtin {
        name: String,
        provider: Option<Arc<dyn BuiltinTools>>,
    },
    Api {
        endpoint: String,
        headers: BTreeMap<String, String>,
        client: Arc<dyn HttpToolClient>,
    },
    Function {
        function_id: String,
        invoker: Arc<dyn FunctionInvoker>,
    },
}

/// The tier-3 executor for one agentic function.
pub struct AgenticExecutor {
    function_id: String,
    spec: AgenticFunction,
    client: Arc<dyn ModelClient>,
    tools: HashMap<String, ToolHandler>,
    descriptors: Vec<ToolDescriptor>,
}

impl std::fmt::Debug for AgenticExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgenticExecutor")
            .field("function_id", &self.function_id)
            .field("descriptors", &self.descriptors)
            .finish_non_exhaustive()
    }
}

impl AgenticExecutor {
    /// Build the executor and its tool registry for `function_id`.
    ///
    /// Fails with a 503-class error when no model binding is wired and
    /// with a 501-class error when any tool declares an inline handler.
    pub fn build(
        function_id: &str,
        spec: &AgenticFunction,
        bindings: &ExecutorBindings,
    ) -> Result<Self, ExecError> {
        let client = bindings.model.clone().ok_or(ExecError::MissingBinding {
            binding: "model client (chat)",
        })?;

        let mut tools = HashMap::new();
        let mut descriptors = Vec::new();
        for tool in &spec.tools {
            match tool_handler(&tool.name, &tool.implementation, bindings)? {
                Some(handler) => {
                    descriptors.push(ToolDescriptor {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        input_schema: tool.input_schema.clone(),
                    });
                    tools.insert(tool.name.clone(), handler);
                }
                // Factory produced no handler; tool is silently
                // unregistered.
                None => {
                    warn!(function = function_id, tool = %tool.name, "tool unregistered: no backing binding");
                }
            }
        }

        Ok(Self {
            function_id: function_id.to_string(),
            spec: spec.clone(),
            client,
            tools,
            descriptors,
        })
    }

    /// Run the agent loop with `input`.
    pub async fn execute(&self, input: &Value) -> Result<Execution, ExecError> {
        let started = Instant::now();
        let max_iterations = self.spec.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        let model = self
            .spec
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let mut messages = vec![ChatMessage {
            role: MessageRole::User,
            content: format!(
                "{}\n\nInput: {}",
                self.spec.goal,
                serde_json::to_string(input).unwrap_or_else(|_| "{}".into())
            ),
            tool_call_id: None,
        }];

        let mut tools_used: Vec<String> = Vec::new();
        let mut tokens_used = 0u64;
        let mut iterations = 0u32;
        let mut last_text: Option<String> = None;

        while iterations < max_iterations {
            iterations += 1;

            let response = self
                .client
                .chat(ChatRequest {
                    model: model.clone(),
                    system: self.spec.system_prompt.clone(),
                    messages: messages.clone(),
                    tools: self.descriptors.clone(),
                })
                .await
                .map_err(|e| ExecError::Backend { message: e.message })?;

            tokens_used += response.tokens.input + response.tokens.output;
            if let Some(budget) = self.spec.token_budget
                && tokens_used > budget
            {
                return Err(ExecError::TokenBudgetExhausted {
                    budget,
                    used: tokens_used,
                });
            }

            if let Some(text) = &response.text {
                last_text = Some(text.clone());
            }

            if response.tool_calls.is_empty() {
                break;
            }

            if let Some(text) = response.text {
                messages.push(ChatMessage {
                    role: MessageRole::Assistant,
                    content: text,
                    tool_call_id: None,
                });
            }

            for call in response.tool_calls {
                if !tools_used.contains(&call.name) {
                    tools_used.push(call.name.clone());
                }
                let result = self.dispatch_tool(&call).await;
                debug!(
                    function = %self.function_id,
                    tool = %call.name,
                    iteration = iterations,
                    "tool dispatched"
                );
                messages.push(ChatMessage {
                    role: MessageRole::Tool,
                    content: result.to_string(),
                    tool_call_id: Some(call.id),
                });
            }
        }

        let text = last_text.ok_or(ExecError::NoFinalAnswer { iterations })?;
        let body = shape_model_output(&text, self.spec.output_schema.as_ref())?;

        let mut meta = ExecutionMeta::new(EXECUTOR_TYPE, 3, started.elapsed().as_millis() as u64);
        meta.agentic_execution = Some(json!({
            "model": model,
            "iterations": iterations,
            "toolsUsed": tools_used,
        }));

        Ok(Execution {
            status: 200,
            body,
            meta,
        })
    }

    /// Dispatch one tool call. Failures come back as structured error
    /// values fed to the model, never as executor errors.
    async fn dispatch_tool(&self, call: &ToolCall) -> Value {
        let Some(handler) = self.tools.get(&call.name) else {
            return json!({ "error": format!("unknown tool: {}", call.name) });
        };

        match handler {
            ToolHandler::Builtin { name, provider } => {
                if !matches!(name.as_str(), "web_search" | "web_fetch") {
                    return json!({ "error": format!("unknown builtin tool: {name}") });
                }
                let Some(provider) = provider else {
                    return json!({
                        "error": "builtin tools are not available in this deployment"
                    });
                };
                let result = if name == "web_search" {
                    let query = call.input["query"].as_str().unwrap_or_default();
                    provider.web_search(query).await
                } else {
                    let url = call.input["url"].as_str().unwrap_or_default();
                    provider.web_fetch(url).await
                };
                result.unwrap_or_else(|e| json!({ "error": e.message }))
            }
            ToolHandler::Api {
                endpoint,
                headers,
                client,
            } => client
                .post_json(endpoint, headers, &call.input)
                .await
                .unwrap_or_else(|e| json!({ "error": e.message })),
            ToolHandler::Function {
                function_id,
                invoker,
            } => invoker
                .invoke(function_id, call.input.clone())
                .await
                .unwrap_or_else(|e| json!({ "error": e.message })),
        }
    }
}

/// Tool-handler factory keyed by implementation type.
///
/// `Ok(None)` means the tool has no backing binding and is silently
/// unregistered; inline handlers are a hard error.
fn tool_handler(
    tool_name: &str,
    implementation: &ToolImplementation,
    bindings: &ExecutorBindings,
) -> Result<Option<ToolHandler>, ExecError> {
    match implementation {
        ToolImplementation::Builtin { name } => Ok(Some(ToolHandler::Builtin {
            name: name.clone(),
            provider: bindings.builtins.clone(),
        })),
        ToolImplementation::Api { endpoint, headers } => {
            Ok(bindings.http_tools.clone().map(|client| ToolHandler::Api {
                endpoint: endpoint.clone(),
                headers: headers.clone(),
                client,
            }))
        }
        ToolImplementation::Function { function_id } => {
            Ok(bindings.invoker.clone().map(|invoker| ToolHandler::Function {
                function_id: function_id.clone(),
                invoker,
            }))
        }
        ToolImplementation::Inline { .. } => Err(ExecError::InlineToolRejected {
            tool: tool_name.to_string(),
        }),
    }
}
