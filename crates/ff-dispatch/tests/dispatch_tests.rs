// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dispatcher tests: tier selection, budget enforcement, cascade chaining
//! and failure policies.

use ff_core::{
    CascadeFunction, CascadeStep, CodeFunction, ErrorHandling, FunctionKind, FunctionMetadata,
    FunctionStub, GenerativeFunction, Language, Tier, ToolImplementation, ToolSpec,
};
use ff_dispatch::{Dispatcher, TierBudgets};
use ff_exec::ExecutorBindings;
use ff_exec::bindings::{BindingError, CodeRuntime, SandboxResponse};
use ff_exec::mock::{EchoCodeRuntime, MemoryHumanTasks, ScriptedModelClient};
use ff_loader::{FunctionLoader, LoaderConfig};
use ff_store::{CodeStore, FunctionRegistry, MemoryCodeStore, MemoryRegistry, MemoryStubCache};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn metadata(id: &str, kind: FunctionKind) -> FunctionMetadata {
    FunctionMetadata {
        id: id.into(),
        version: "1.0.0".into(),
        kind,
        name: None,
        description: None,
        tags: vec![],
        owner_id: None,
        org_id: None,
        created_at: None,
        updated_at: None,
    }
}

fn code_kind() -> FunctionKind {
    FunctionKind::Code(CodeFunction {
        language: Language::Javascript,
        entry_point: "index.js".into(),
        dependencies: BTreeMap::new(),
    })
}

fn generative_kind(prompt: &str) -> FunctionKind {
    FunctionKind::Generative(GenerativeFunction {
        model: None,
        user_prompt: prompt.into(),
        system_prompt: None,
        output_schema: None,
        temperature: None,
        max_tokens: None,
        examples: vec![],
        input_schema: None,
    })
}

struct Harness {
    registry: Arc<MemoryRegistry>,
    code_store: Arc<MemoryCodeStore>,
    loader: Arc<FunctionLoader>,
}

impl Harness {
    fn new() -> Self {
        let registry = Arc::new(MemoryRegistry::new());
        let code_store = Arc::new(MemoryCodeStore::new());
        let loader = Arc::new(FunctionLoader::new(
            Arc::clone(&registry) as Arc<dyn FunctionRegistry>,
            Arc::clone(&code_store) as Arc<dyn CodeStore>,
            Arc::new(MemoryStubCache::new()),
            LoaderConfig::default(),
        ));
        Self {
            registry,
            code_store,
            loader,
        }
    }

    async fn deploy(&self, meta: &FunctionMetadata, code: Option<&str>) {
        self.registry.put(meta).await.unwrap();
        if let Some(source) = code {
            self.code_store
                .put(&meta.id, &meta.version, &ff_core::CodeArtifact::text(source))
                .await
                .unwrap();
        }
    }

    fn dispatcher(&self, bindings: ExecutorBindings, budgets: TierBudgets) -> Arc<Dispatcher> {
        Dispatcher::new(Arc::clone(&self.loader), bindings, budgets)
    }
}

fn stub_of(kind: FunctionKind, id: &str) -> FunctionStub {
    FunctionStub::new(metadata(id, kind), None)
}

#[tokio::test]
async fn code_dispatch_reports_tier_one_meta() {
    let harness = Harness::new();
    let bindings = ExecutorBindings {
        code_runtime: Some(Arc::new(EchoCodeRuntime)),
        ..Default::default()
    };
    let dispatcher = harness.dispatcher(bindings, TierBudgets::default());

    let stub = FunctionStub::new(
        metadata("sum", code_kind()),
        Some(ff_core::CodeArtifact::text("export default 1")),
    );
    let outcome = dispatcher.dispatch(&stub, json!({"a": 1})).await;

    assert_eq!(outcome.status, 200);
    assert_eq!(outcome.body["_meta"]["tier"], 1);
    assert_eq!(outcome.body["_meta"]["executorType"], "code-executor");
    assert!(outcome.body["_meta"]["durationMs"].is_u64());
}

#[tokio::test]
async fn missing_binding_maps_to_503_naming_it() {
    let harness = Harness::new();
    let dispatcher = harness.dispatcher(ExecutorBindings::default(), TierBudgets::default());

    let outcome = dispatcher
        .dispatch(&stub_of(generative_kind("hi"), "gen"), json!({}))
        .await;
    assert_eq!(outcome.status, 503);
    assert_eq!(outcome.body["code"], "service-unavailable");
    assert!(
        outcome.body["error"]
            .as_str()
            .unwrap()
            .contains("messages.create")
    );
}

#[tokio::test]
async fn budget_overrun_is_504_and_feeds_the_breaker() {
    struct SlowRuntime;

    #[async_trait::async_trait]
    impl CodeRuntime for SlowRuntime {
        async fn invoke(
            &self,
            _artifact: &ff_core::CodeArtifact,
            _entry_point: &str,
            _input: &Value,
        ) -> Result<SandboxResponse, BindingError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(SandboxResponse {
                status: 200,
                body: json!({}),
            })
        }
    }

    let harness = Harness::new();
    let bindings = ExecutorBindings {
        code_runtime: Some(Arc::new(SlowRuntime)),
        ..Default::default()
    };
    let budgets = TierBudgets {
        code: Duration::from_millis(20),
        ..Default::default()
    };
    let dispatcher = harness.dispatcher(bindings, budgets);

    let stub = FunctionStub::new(
        metadata("slow", code_kind()),
        Some(ff_core::CodeArtifact::text("x")),
    );
    let outcome = dispatcher.dispatch(&stub, json!({})).await;

    assert_eq!(outcome.status, 504);
    assert_eq!(outcome.body["code"], "timeout");
    assert!(outcome.body["error"].as_str().unwrap().contains("tier 1"));
}

#[tokio::test]
async fn cascade_chains_step_output_into_next_input() {
    let harness = Harness::new();

    // Two generative steps; the second's prompt references the first's
    // output field.
    harness
        .deploy(&metadata("step-a", generative_kind("Start from {{input}}")), None)
        .await;
    harness
        .deploy(
            &metadata("step-b", generative_kind("Continue with {{output}}")),
            None,
        )
        .await;

    let client = Arc::new(ScriptedModelClient::new());
    client.push_text("A");
    client.push_text("B");

    let bindings = ExecutorBindings {
        model: Some(Arc::clone(&client) as _),
        ..Default::default()
    };
    let dispatcher = harness.dispatcher(bindings, TierBudgets::default());

    let cascade = stub_of(
        FunctionKind::Cascade(CascadeFunction {
            steps: vec![
                CascadeStep {
                    function_id: "step-a".into(),
                    tier: Tier::Generative,
                },
                CascadeStep {
                    function_id: "step-b".into(),
                    tier: Tier::Generative,
                },
            ],
            error_handling: ErrorHandling::FailFast,
        }),
        "pipeline",
    );

    let outcome = dispatcher.dispatch(&cascade, json!({"input": "seed"})).await;
    assert_eq!(outcome.status, 200);
    assert_eq!(outcome.body["output"], "B");
    assert_eq!(outcome.body["_meta"]["stepsExecuted"], 2);
    assert_eq!(
        outcome.body["_meta"]["tiersAttempted"],
        json!(["generative", "generative"])
    );

    // Step B's rendered prompt received step A's output.
    let requests = client.message_requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].prompt.contains("A"));
}

#[tokio::test]
async fn fail_fast_cascade_aborts_on_missing_step() {
    let harness = Harness::new();
    let client = Arc::new(ScriptedModelClient::new());
    let bindings = ExecutorBindings {
        model: Some(client as _),
        ..Default::default()
    };
    let dispatcher = harness.dispatcher(bindings, TierBudgets::default());

    let cascade = stub_of(
        FunctionKind::Cascade(CascadeFunction {
            steps: vec![CascadeStep {
                function_id: "ghost".into(),
                tier: Tier::Generative,
            }],
            error_handling: ErrorHandling::FailFast,
        }),
        "pipeline",
    );

    let outcome = dispatcher.dispatch(&cascade, json!({})).await;
    assert_eq!(outcome.status, 404);
    assert_eq!(outcome.body["_meta"]["tiersAttempted"], json!(["generative"]));
    assert_eq!(outcome.body["_meta"]["stepsExecuted"], 0);
}

#[tokio::test]
async fn best_effort_cascade_reports_what_succeeded() {
    let harness = Harness::new();
    harness
        .deploy(&metadata("works", generative_kind("go")), None)
        .await;

    let client = Arc::new(ScriptedModelClient::new());
    client.push_text("partial result");
    let bindings = ExecutorBindings {
        model: Some(client as _),
        ..Default::default()
    };
    let dispatcher = harness.dispatcher(bindings, TierBudgets::default());

    let cascade = stub_of(
        FunctionKind::Cascade(CascadeFunction {
            steps: vec![
                CascadeStep {
                    function_id: "ghost".into(),
                    tier: Tier::Code,
                },
                CascadeStep {
                    function_id: "works".into(),
                    tier: Tier::Generative,
                },
            ],
            error_handling: ErrorHandling::BestEffort,
        }),
        "pipeline",
    );

    let outcome = dispatcher.dispatch(&cascade, json!({})).await;
    assert_eq!(outcome.status, 200);
    assert_eq!(outcome.body["output"], "partial result");
    assert_eq!(outcome.body["_meta"]["stepsExecuted"], 1);
    assert_eq!(outcome.body["_meta"]["tiersAttempted"], json!(["code", "generative"]));
}

#[tokio::test]
async fn cascade_with_no_successes_is_500() {
    let harness = Harness::new();
    let dispatcher = harness.dispatcher(ExecutorBindings::default(), TierBudgets::default());

    let cascade = stub_of(
        FunctionKind::Cascade(CascadeFunction {
            steps: vec![CascadeStep {
                function_id: "ghost".into(),
                tier: Tier::Code,
            }],
            error_handling: ErrorHandling::Continue,
        }),
        "pipeline",
    );

    let outcome = dispatcher.dispatch(&cascade, json!({})).await;
    assert_eq!(outcome.status, 500);
    assert_eq!(outcome.body["error"], "no successful steps");
}

#[tokio::test]
async fn inline_tool_surfaces_501() {
    let harness = Harness::new();
    let client = Arc::new(ScriptedModelClient::new());
    let bindings = ExecutorBindings {
        model: Some(client as _),
        ..Default::default()
    };
    let dispatcher = harness.dispatcher(bindings, TierBudgets::default());

    let stub = stub_of(
        FunctionKind::Agentic(ff_core::AgenticFunction {
            model: None,
            system_prompt: "s".into(),
            goal: "g".into(),
            tools: vec![ToolSpec {
                name: "inline-tool".into(),
                description: "d".into(),
                input_schema: None,
                implementation: ToolImplementation::Inline {
                    code: "return 1".into(),
                },
            }],
            max_iterations: None,
            token_budget: None,
            output_schema: None,
        }),
        "agent",
    );

    let outcome = dispatcher.dispatch(&stub, json!({})).await;
    assert_eq!(outcome.status, 501);
    assert_eq!(outcome.body["code"], "not-implemented");
}

#[tokio::test]
async fn human_dispatch_returns_202() {
    let harness = Harness::new();
    let tasks = Arc::new(MemoryHumanTasks::new());
    let bindings = ExecutorBindings {
        human_tasks: Some(Arc::clone(&tasks) as _),
        ..Default::default()
    };
    let dispatcher = harness.dispatcher(bindings, TierBudgets::default());

    let stub = stub_of(
        FunctionKind::Human(ff_core::HumanFunction {
            interaction_type: ff_core::InteractionType::Approval,
            ui: None,
            assignees: vec![],
            sla: None,
            reminders: vec![],
            escalation: None,
        }),
        "sign-off",
    );

    let outcome = dispatcher.dispatch(&stub, json!({"doc": "q3"})).await;
    assert_eq!(outcome.status, 202);
    assert_eq!(outcome.body["taskStatus"], "pending");
    assert_eq!(outcome.body["_meta"]["tier"], 4);
    assert_eq!(tasks.created_count(), 1);
}
