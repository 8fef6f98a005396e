// SPDX-License-Identifier: MIT OR Apache-2.0
//! Mock bindings for tests and local runs (`--mock-bindings`).

use crate::bindings::{
    BindingError, BuiltinTools, ChatRequest, ChatResponse, CodeRuntime, CreatedTask,
    HumanTaskService, MessageRequest, MessageResponse, ModelClient, NewHumanTask,
    SandboxResponse, TokenUsage,
};
use async_trait::async_trait;
use ff_core::CodeArtifact;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};

/// Model client replaying scripted responses; unscripted calls echo the
/// request.
#[derive(Default)]
pub struct ScriptedModelClient {
    messages: Mutex<VecDeque<MessageResponse>>,
    chats: Mutex<VecDeque<ChatResponse>>,
    message_requests: Mutex<Vec<MessageRequest>>,
    chat_log: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModelClient {
    /// Empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a `create_message` response.
    pub fn push_message(&self, response: MessageResponse) {
        self.messages.lock().expect("script lock").push_back(response);
    }

    /// Queue a `create_message` response with just a text payload.
    pub fn push_text(&self, text: &str) {
        self.push_message(MessageResponse {
            model: "scripted-model".into(),
            text: text.to_string(),
            tokens: TokenUsage {
                input: 10,
                output: 10,
            },
            stop_reason: Some("end_turn".into()),
        });
    }

    /// Queue a `chat` response.
    pub fn push_chat(&self, response: ChatResponse) {
        self.chats.lock().expect("script lock").push_back(response);
    }

    /// Requests seen by `create_message`.
    #[must_use]
    pub fn message_requests(&self) -> Vec<MessageRequest> {
        self.message_requests.lock().expect("script lock").clone()
    }

    /// Requests seen by `chat`.
    #[must_use]
    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        self.chat_log.lock().expect("script lock").clone()
    }

    /// Total model calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.message_requests.lock().expect("script lock").len()
            + self.chat_log.lock().expect("script lock").len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
    async fn create_message(
        &self,
        request: MessageRequest,
    ) -> Result<MessageResponse, BindingError> {
        self.message_requests
            .lock()
            .expect("script lock")
            .push(request.clone());
        if let Some(scripted) = self.messages.lock().expect("script lock").pop_front() {
            return Ok(scripted);
        }
        Ok(MessageResponse {
            model: request.model,
            text: format!("echo: {}", request.prompt),
            tokens: TokenUsage {
                input: 10,
                output: 10,
            },
            stop_reason: Some("end_turn".into()),
        })
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, BindingError> {
        self.chat_log.lock().expect("script lock").push(request.clone());
        if let Some(scripted) = self.chats.lock().expect("script lock").pop_front() {
            return Ok(scripted);
        }
        Ok(ChatResponse {
            model: request.model,
            text: Some("done".into()),
            tool_calls: vec![],
            tokens: TokenUsage {
                input: 10,
                output: 10,
            },
            stop_reason: Some("end_turn".into()),
        })
    }
}

/// Sandbox mock that echoes the invocation input.
pub struct EchoCodeRuntime;

#[async_trait]
impl CodeRuntime for EchoCodeRuntime {
    async fn invoke(
        &self,
        _artifact: &CodeArtifact,
        entry_point: &str,
        input: &Value,
    ) -> Result<SandboxResponse, BindingError> {
        Ok(SandboxResponse {
            status: 200,
            body: json!({ "echo": input, "entryPoint": entry_point }),
        })
    }
}

/// In-memory human-task store issuing sequential task ids.
#[derive(Default)]
pub struct MemoryHumanTasks {
    counter: AtomicUsize,
    created: Mutex<Vec<NewHumanTask>>,
}

impl MemoryHumanTasks {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks created so far.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.created.lock().expect("task lock").len()
    }
}

#[async_trait]
impl HumanTaskService for MemoryHumanTasks {
    async fn create_task(&self, task: NewHumanTask) -> Result<CreatedTask, BindingError> {
        let id = self.counter.fetch_add(1, Relaxed) + 1;
        self.created.lock().expect("task lock").push(task);
        Ok(CreatedTask {
            task_id: format!("task-{id}"),
            task_url: Some(format!("https://tasks.internal/task-{id}")),
            expires_at: None,
        })
    }
}

/// Builtin tools answering canned payloads.
pub struct StaticBuiltins;

#[async_trait]
impl BuiltinTools for StaticBuiltins {
    async fn web_search(&self, query: &str) -> Result<Value, BindingError> {
        Ok(json!({ "results": [], "query": query }))
    }

    async fn web_fetch(&self, url: &str) -> Result<Value, BindingError> {
        Ok(json!({ "url": url, "content": "" }))
    }
}
