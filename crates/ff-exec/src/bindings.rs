// SPDX-License-Identifier: MIT OR Apache-2.0
//! Injected service seams.
//!
//! Everything the executors talk to lives behind one of these traits: the
//! model backend, the host sandbox, the human-task store, HTTP tool
//! endpoints, the built-in tool provider, nested function dispatch, and
//! the source compiler. Deployments wire real implementations; tests use
//! the mocks in [`crate::mock`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ff_core::{Assignee, CodeArtifact, InteractionType, Language, SlaSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a bound service call.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BindingError {
    /// What the backend reported.
    pub message: String,
}

impl BindingError {
    /// Build from any displayable error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Model client
// ---------------------------------------------------------------------------

/// Prompt/completion token counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input: u64,
    /// Completion tokens.
    pub output: u64,
}

/// Single-shot generation request (`messages.create`).
#[derive(Debug, Clone)]
pub struct MessageRequest {
    /// Model identifier.
    pub model: String,
    /// Optional system prompt.
    pub system: Option<String>,
    /// Rendered user prompt.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Completion cap.
    pub max_tokens: Option<u32>,
}

/// Single-shot generation response.
#[derive(Debug, Clone)]
pub struct MessageResponse {
    /// Model that answered.
    pub model: String,
    /// First text content.
    pub text: String,
    /// Token usage.
    pub tokens: TokenUsage,
    /// Stop reason, when reported.
    pub stop_reason: Option<String>,
}

/// Chat message roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Caller turn.
    User,
    /// Model turn.
    Assistant,
    /// Tool result fed back to the model.
    Tool,
}

/// One turn of an agent conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Who produced the turn.
    pub role: MessageRole,
    /// Turn content (tool results carry serialized JSON).
    pub content: String,
    /// Tool call the content answers, for `role = tool`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// A tool surfaced to the model.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name.
    pub name: String,
    /// Description handed to the model.
    pub description: String,
    /// Input schema, when declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// Agent-loop chat request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// System prompt.
    pub system: String,
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// Registered tools.
    pub tools: Vec<ToolDescriptor>,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id for the result message.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool input.
    pub input: Value,
}

/// Agent-loop chat response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Model that answered.
    pub model: String,
    /// Assistant text, when present.
    pub text: Option<String>,
    /// Tool calls to dispatch; empty means the agent is done.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage for this turn.
    pub tokens: TokenUsage,
    /// Stop reason, when reported.
    pub stop_reason: Option<String>,
}

/// The AI backend: single-shot `create_message` for generative functions,
/// iterative `chat` for agentic ones.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// One generation request.
    async fn create_message(&self, request: MessageRequest)
    -> Result<MessageResponse, BindingError>;

    /// One agent-loop turn.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, BindingError>;
}

// ---------------------------------------------------------------------------
// Host sandbox
// ---------------------------------------------------------------------------

/// Response from the host sandbox.
#[derive(Debug, Clone)]
pub struct SandboxResponse {
    /// Status reported by user code.
    pub status: u16,
    /// Body produced by user code.
    pub body: Value,
}

/// The host platform's isolate/loader service. Isolation is the host's
/// responsibility; the core hands over the artifact and the invocation
/// input and gets a response back.
#[async_trait]
pub trait CodeRuntime: Send + Sync {
    /// Invoke `artifact` at `entry_point` with `input`.
    async fn invoke(
        &self,
        artifact: &CodeArtifact,
        entry_point: &str,
        input: &Value,
    ) -> Result<SandboxResponse, BindingError>;
}

// ---------------------------------------------------------------------------
// Human tasks
// ---------------------------------------------------------------------------

/// A task to be created in the durable human-task store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHumanTask {
    /// Function the task belongs to.
    pub function_id: String,
    /// Interaction style.
    pub interaction_type: InteractionType,
    /// UI hints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui: Option<Value>,
    /// Routing targets.
    pub assignees: Vec<Assignee>,
    /// Invocation input shown to the assignee.
    pub input: Value,
    /// Deadline configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla: Option<SlaSpec>,
}

/// Handle to a created task.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTask {
    /// Durable task id.
    pub task_id: String,
    /// Frontend URL, when the store exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_url: Option<String>,
    /// Expiry, when the store computed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// The durable human-task store.
#[async_trait]
pub trait HumanTaskService: Send + Sync {
    /// Create a pending task.
    async fn create_task(&self, task: NewHumanTask) -> Result<CreatedTask, BindingError>;
}

// ---------------------------------------------------------------------------
// Tool backends
// ---------------------------------------------------------------------------

/// HTTP client used by `api` tools.
#[async_trait]
pub trait HttpToolClient: Send + Sync {
    /// POST `body` as JSON to `endpoint` and return the JSON response.
    async fn post_json(
        &self,
        endpoint: &str,
        headers: &BTreeMap<String, String>,
        body: &Value,
    ) -> Result<Value, BindingError>;
}

/// Production [`HttpToolClient`] over reqwest.
pub struct ReqwestToolClient {
    client: reqwest::Client,
}

impl ReqwestToolClient {
    /// Client with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestToolClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpToolClient for ReqwestToolClient {
    async fn post_json(
        &self,
        endpoint: &str,
        headers: &BTreeMap<String, String>,
        body: &Value,
    ) -> Result<Value, BindingError> {
        let mut request = self.client.post(endpoint).json(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request
            .send()
            .await
            .map_err(|e| BindingError::new(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(BindingError::new(format!(
                "tool endpoint returned {status}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| BindingError::new(format!("tool endpoint returned non-JSON: {e}")))
    }
}

/// Provider for the fixed built-in tool set.
#[async_trait]
pub trait BuiltinTools: Send + Sync {
    /// `web_search` builtin.
    async fn web_search(&self, query: &str) -> Result<Value, BindingError>;
    /// `web_fetch` builtin.
    async fn web_fetch(&self, url: &str) -> Result<Value, BindingError>;
}

/// Nested dispatch seam for `function` tools. Implemented by the
/// dispatcher; injected here to break the crate cycle.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    /// Invoke another deployed function and return its body.
    async fn invoke(&self, function_id: &str, input: Value) -> Result<Value, BindingError>;
}

// ---------------------------------------------------------------------------
// Compiler
// ---------------------------------------------------------------------------

/// The opaque `compile(source) → bytes` service used at deploy time for
/// languages that require compilation.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compile `source` for `language` into executable bytes.
    async fn compile(&self, language: Language, source: &str) -> Result<Vec<u8>, BindingError>;
}

// ---------------------------------------------------------------------------
// Binding bundle
// ---------------------------------------------------------------------------

/// Everything a deployment wires in, all optional. Executors surface a 503
/// naming the capability when the binding they need is absent.
#[derive(Clone, Default)]
pub struct ExecutorBindings {
    /// AI backend.
    pub model: Option<Arc<dyn ModelClient>>,
    /// Host sandbox.
    pub code_runtime: Option<Arc<dyn CodeRuntime>>,
    /// Human-task store.
    pub human_tasks: Option<Arc<dyn HumanTaskService>>,
    /// HTTP client for `api` tools.
    pub http_tools: Option<Arc<dyn HttpToolClient>>,
    /// Built-in tool provider.
    pub builtins: Option<Arc<dyn BuiltinTools>>,
    /// Nested function dispatch for `function` tools.
    pub invoker: Option<Arc<dyn FunctionInvoker>>,
}
