// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end gateway tests driving the axum app in process: invoke dedup,
//! cascade chaining, auth default-deny, rate limiting with Retry-After,
//! deploy validation ordering, rollback, and the error envelope.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use ff_auth::ApiKeyRecord;
use ff_core::{
    CascadeFunction, CascadeStep, CodeArtifact, CodeFunction, ErrorHandling, FunctionKind,
    FunctionMetadata, GenerativeFunction, Language, Tier, sha256_hex,
};
use ff_exec::ExecutorBindings;
use ff_exec::bindings::{BindingError, CodeRuntime, SandboxResponse};
use ff_exec::mock::{MemoryHumanTasks, ScriptedModelClient};
use ff_gateway::config::{GatewayConfig, SeededApiKey};
use ff_gateway::{AppState, Stores, build_app, build_state};
use ff_limit::LimitConfig;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::time::Duration;
use tower::ServiceExt;

const TEST_KEY: &str = "sk_test_abcd";

fn base_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.api_keys.push(SeededApiKey {
        key_hash: sha256_hex(TEST_KEY.as_bytes()),
        record: ApiKeyRecord {
            name: Some("test".into()),
            owner_id: Some("user-1".into()),
            org_ids: vec!["org-1".into()],
            scopes: vec!["*".into()],
            active: true,
            expires_at: None,
        },
    });
    config
}

fn harness(
    configure: impl FnOnce(&mut GatewayConfig),
    bindings: ExecutorBindings,
) -> (Arc<AppState>, Router) {
    let mut config = base_config();
    configure(&mut config);
    let state = build_state(&config, Stores::in_memory(), bindings, None);
    let app = build_app(Arc::clone(&state));
    (state, app)
}

fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-api-key", TEST_KEY)
        .header("content-type", "application/json");
    match body {
        Some(v) => builder.body(Body::from(v.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.unwrap()
}

async fn json_of(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn metadata(id: &str, version: &str, kind: FunctionKind) -> FunctionMetadata {
    FunctionMetadata {
        id: id.into(),
        version: version.into(),
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

fn code_kind(entry_point: &str) -> FunctionKind {
    FunctionKind::Code(CodeFunction {
        language: Language::Javascript,
        entry_point: entry_point.into(),
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

async fn seed(state: &Arc<AppState>, meta: FunctionMetadata, code: Option<&str>) {
    if let Some(source) = code {
        state
            .code_store
            .put(&meta.id, &meta.version, &CodeArtifact::text(source))
            .await
            .unwrap();
    }
    state.registry.put(&meta).await.unwrap();
}

/// Sandbox mock that answers `{"sum": 3}` after a short delay, counting
/// invocations.
struct SumRuntime {
    calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl CodeRuntime for SumRuntime {
    async fn invoke(
        &self,
        _artifact: &CodeArtifact,
        _entry_point: &str,
        _input: &Value,
    ) -> Result<SandboxResponse, BindingError> {
        self.calls.fetch_add(1, Relaxed);
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(SandboxResponse {
            status: 200,
            body: json!({"sum": 3}),
        })
    }
}

/// Sandbox mock echoing the stub's entry point (for rollback assertions).
struct EntryPointRuntime;

#[async_trait::async_trait]
impl CodeRuntime for EntryPointRuntime {
    async fn invoke(
        &self,
        _artifact: &CodeArtifact,
        entry_point: &str,
        _input: &Value,
    ) -> Result<SandboxResponse, BindingError> {
        Ok(SandboxResponse {
            status: 200,
            body: json!({"entryPoint": entry_point}),
        })
    }
}

// ---------------------------------------------------------------------------
// Liveness and envelope basics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_ok() {
    let (_state, app) = harness(|_| {}, ExecutorBindings::default());

    let resp = send(
        &app,
        Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "function-fabric");
}

#[tokio::test]
async fn unknown_route_is_json_404_with_correlation() {
    let (_state, app) = harness(|_| {}, ExecutorBindings::default());

    let resp = send(
        &app,
        Request::builder()
            .uri("/nope")
            .header("x-request-id", "corr-42")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(resp.headers()["x-request-id"], "corr-42");
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not-found");
    assert_eq!(body["correlationId"], "corr-42");
}

#[tokio::test]
async fn wrong_method_is_json_405() {
    let (_state, app) = harness(|_| {}, ExecutorBindings::default());

    let resp = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri("/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["code"], "method-not-allowed");
}

#[tokio::test]
async fn correlation_id_is_generated_when_absent() {
    let (_state, app) = harness(|_| {}, ExecutorBindings::default());

    let resp = send(
        &app,
        Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let echoed = resp.headers()["x-request-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(echoed).is_ok());
}

#[tokio::test]
async fn oversized_declared_body_is_413() {
    let (_state, app) = harness(|_| {}, ExecutorBindings::default());

    let resp = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/v1/api/functions")
            .header("x-api-key", TEST_KEY)
            .header("content-length", "60000000")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "payload-too-large");
}

// ---------------------------------------------------------------------------
// Scenario: invoke with dedup hit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_identical_invokes_coalesce() {
    let calls = Arc::new(AtomicUsize::new(0));
    let bindings = ExecutorBindings {
        code_runtime: Some(Arc::new(SumRuntime {
            calls: Arc::clone(&calls),
        })),
        ..Default::default()
    };
    let (state, app) = harness(|_| {}, bindings);
    seed(&state, metadata("sum", "1.0.0", code_kind("index.js")), Some("x")).await;

    let body = json!({"a": 1, "b": 2});
    let (first, second) = tokio::join!(
        send(&app, request("POST", "/v1/functions/sum", Some(body.clone()))),
        send(&app, request("POST", "/v1/functions/sum", Some(body.clone()))),
    );

    assert_eq!(calls.load(Relaxed), 1);

    let first_dedup = first.headers().contains_key("x-deduplicated");
    let second_dedup = second.headers().contains_key("x-deduplicated");
    assert_ne!(first_dedup, second_dedup, "exactly one waiter");

    for resp in [first, second] {
        let (status, body) = json_of(resp).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sum"], 3);
        assert_eq!(body["_meta"]["tier"], 1);
    }
}

#[tokio::test]
async fn sequential_identical_invokes_execute_twice() {
    let calls = Arc::new(AtomicUsize::new(0));
    let bindings = ExecutorBindings {
        code_runtime: Some(Arc::new(SumRuntime {
            calls: Arc::clone(&calls),
        })),
        ..Default::default()
    };
    let (state, app) = harness(|_| {}, bindings);
    seed(&state, metadata("sum", "1.0.0", code_kind("index.js")), Some("x")).await;

    let body = json!({"a": 1, "b": 2});
    for _ in 0..2 {
        let resp = send(&app, request("POST", "/v1/functions/sum", Some(body.clone()))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!resp.headers().contains_key("x-deduplicated"));
    }
    assert_eq!(calls.load(Relaxed), 2);
}

// ---------------------------------------------------------------------------
// Scenario: cascade chain
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cascade_threads_output_into_next_step() {
    let client = Arc::new(ScriptedModelClient::new());
    client.push_text("A");
    client.push_text("B");
    let bindings = ExecutorBindings {
        model: Some(Arc::clone(&client) as _),
        ..Default::default()
    };
    let (state, app) = harness(|_| {}, bindings);

    seed(
        &state,
        metadata("step-a", "1.0.0", generative_kind("Start: {{input}}")),
        None,
    )
    .await;
    seed(
        &state,
        metadata("step-b", "1.0.0", generative_kind("Continue: {{output}}")),
        None,
    )
    .await;
    seed(
        &state,
        metadata(
            "pipeline",
            "1.0.0",
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
        ),
        None,
    )
    .await;

    let resp = send(
        &app,
        request("POST", "/v1/cascade/pipeline", Some(json!({"input": "seed"}))),
    )
    .await;
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "B");
    assert_eq!(body["_meta"]["stepsExecuted"], 2);

    // Step B saw step A's output.
    let prompts = client.message_requests();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].prompt.contains("A"));
}

#[tokio::test]
async fn cascade_route_rejects_non_cascades() {
    let (state, app) = harness(|_| {}, ExecutorBindings::default());
    seed(&state, metadata("plain", "1.0.0", generative_kind("x")), None).await;

    let resp = send(&app, request("POST", "/v1/cascade/plain", Some(json!({})))).await;
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("not a cascade"));
}

// ---------------------------------------------------------------------------
// Scenario: auth default-deny
// ---------------------------------------------------------------------------

#[tokio::test]
async fn default_deny_without_auth_backends() {
    // No seeded keys, no OAuth: every protected route denies.
    let mut config = GatewayConfig::default();
    config.auth.api_keys.clear();
    let state = build_state(
        &config,
        Stores::in_memory(),
        ExecutorBindings::default(),
        None,
    );
    let app = build_app(Arc::clone(&state));

    let resp = send(
        &app,
        Request::builder()
            .uri("/v1/api/functions/x")
            .header("authorization", "Bearer some-token")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let www = resp.headers()["www-authenticate"].to_str().unwrap();
    assert!(www.contains("Bearer"));
    let (_, body) = json_of(resp).await;
    assert_eq!(body["code"], "authentication");
    assert!(body["correlationId"].is_string());
}

#[tokio::test]
async fn unknown_api_key_is_rejected() {
    let (_state, app) = harness(|_| {}, ExecutorBindings::default());

    let resp = send(
        &app,
        Request::builder()
            .uri("/v1/api/functions")
            .header("x-api-key", "sk_wrong_key")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn auth_introspection_reports_the_key_hint() {
    let (_state, app) = harness(|_| {}, ExecutorBindings::default());

    let resp = send(&app, request("GET", "/v1/api/auth/validate", None)).await;
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["principal"]["keyHint"], "****abcd");

    let resp = send(&app, request("GET", "/v1/api/auth/orgs", None)).await;
    let (_, body) = json_of(resp).await;
    assert_eq!(body["organizations"], json!(["org-1"]));
}

// ---------------------------------------------------------------------------
// Scenario: rate limit with Retry-After
// ---------------------------------------------------------------------------

#[tokio::test]
async fn third_request_in_window_is_429_with_retry_after() {
    let (state, app) = harness(
        |config| {
            config.rate_limit.ip = Some(LimitConfig {
                window_ms: 60_000,
                max_requests: 2,
            });
        },
        ExecutorBindings {
            model: Some(Arc::new(ScriptedModelClient::new())),
            ..Default::default()
        },
    );
    seed(&state, metadata("echo", "1.0.0", generative_kind("say {{msg}}")), None).await;

    let make = || {
        let mut req = request("POST", "/v1/functions/echo", Some(json!({"msg": "hi"})));
        req.headers_mut()
            .insert("x-forwarded-for", "198.51.100.7".parse().unwrap());
        req
    };

    let first = send(&app, make()).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-ratelimit-limit"], "2");

    let second = send(&app, make()).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers()["x-ratelimit-remaining"], "0");

    let third = send(&app, make()).await;
    assert_eq!(third.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = third.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));

    let (_, body) = json_of(third).await;
    assert_eq!(body["code"], "rate-limit");
    assert_eq!(body["context"]["retryAfter"], retry_after);

    // A different client address is unaffected.
    let mut other = request("POST", "/v1/functions/echo", Some(json!({"msg": "hi"})));
    other
        .headers_mut()
        .insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
    assert_eq!(send(&app, other).await.status(), StatusCode::OK);
}

// ---------------------------------------------------------------------------
// Scenario: deploy validation ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deploy_cites_the_first_violation() {
    let (_state, app) = harness(|_| {}, ExecutorBindings::default());

    let cases = [
        (json!({"id": "-bad", "version": "1.0", "language": "ruby"}), "function id"),
        (json!({"id": "ok", "version": "1.0", "language": "ruby"}), "version"),
        (json!({"id": "ok", "version": "1.0.0", "language": "ruby"}), "language"),
    ];

    for (body, expected) in cases {
        let resp = send(&app, request("POST", "/v1/api/functions", Some(body))).await;
        let (status, body) = json_of(resp).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation");
        let message = body["error"].as_str().unwrap();
        assert!(
            message.contains(expected),
            "expected '{expected}' in '{message}'"
        );
    }
}

// ---------------------------------------------------------------------------
// Deploy lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deploy_info_roundtrip_and_audit() {
    let (state, app) = harness(|_| {}, ExecutorBindings::default());

    let deploy_body = json!({
        "id": "greeter",
        "version": "1.0.0",
        "kind": "generative",
        "userPrompt": "Greet {{name}}",
        "name": "Greeter",
        "tags": ["demo"],
    });
    let resp = send(&app, request("POST", "/v1/api/functions", Some(deploy_body))).await;
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "deployed");
    assert_eq!(body["url"], "/v1/functions/greeter");

    let resp = send(&app, request("GET", "/v1/api/functions/greeter", None)).await;
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "greeter");
    assert_eq!(body["version"], "1.0.0");
    assert_eq!(body["kind"], "generative");
    assert_eq!(body["userPrompt"], "Greet {{name}}");
    assert_eq!(body["tags"], json!(["demo"]));
    assert!(body["createdAt"].is_string());

    let audit = state.audit.recent(10);
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, "deploy");
    assert_eq!(audit[0].resource, "function:greeter");
    assert_eq!(audit[0].status, "success");
    assert_eq!(audit[0].user_id.as_deref(), Some("user-1"));
}

#[tokio::test]
async fn redeploying_the_same_version_is_rejected() {
    let (_state, app) = harness(|_| {}, ExecutorBindings::default());
    let body = json!({
        "id": "dup",
        "version": "1.0.0",
        "kind": "generative",
        "userPrompt": "x",
    });

    let resp = send(&app, request("POST", "/v1/api/functions", Some(body.clone()))).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = send(&app, request("POST", "/v1/api/functions", Some(body))).await;
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("already exists"));
}

#[tokio::test]
async fn patch_updates_mutable_fields_only() {
    let (state, app) = harness(|_| {}, ExecutorBindings::default());
    seed(&state, metadata("fn-a", "1.0.0", generative_kind("x")), None).await;

    let resp = send(
        &app,
        request(
            "PATCH",
            "/v1/api/functions/fn-a",
            Some(json!({"name": "renamed", "description": "now documented"})),
        ),
    )
    .await;
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "renamed");
    assert!(body["updatedAt"].is_string());

    let resp = send(
        &app,
        request(
            "PATCH",
            "/v1/api/functions/fn-a",
            Some(json!({"version": "9.9.9"})),
        ),
    )
    .await;
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("immutable"));
}

#[tokio::test]
async fn delete_removes_and_audits() {
    let (state, app) = harness(|_| {}, ExecutorBindings::default());
    seed(&state, metadata("victim", "1.0.0", generative_kind("x")), None).await;

    let resp = send(&app, request("DELETE", "/v1/api/functions/victim", None)).await;
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let resp = send(&app, request("GET", "/v1/api/functions/victim", None)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let audit = state.audit.recent(10);
    assert_eq!(audit.last().unwrap().action, "delete");
}

#[tokio::test]
async fn legacy_api_alias_lists_functions() {
    let (state, app) = harness(|_| {}, ExecutorBindings::default());
    seed(&state, metadata("fn-a", "1.0.0", generative_kind("x")), None).await;

    let resp = send(&app, request("GET", "/api/functions", None)).await;
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["functions"][0]["id"], "fn-a");
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rollback_serves_the_pinned_version_on_invoke() {
    let bindings = ExecutorBindings {
        code_runtime: Some(Arc::new(EntryPointRuntime)),
        ..Default::default()
    };
    let (state, app) = harness(|_| {}, bindings);

    seed(&state, metadata("fn-r", "1.0.0", code_kind("v1.js")), Some("v1")).await;
    seed(&state, metadata("fn-r", "2.0.0", code_kind("v2.js")), Some("v2")).await;

    let resp = send(&app, request("POST", "/v1/functions/fn-r", Some(json!({})))).await;
    let (_, body) = json_of(resp).await;
    assert_eq!(body["entryPoint"], "v2.js");

    let resp = send(
        &app,
        request(
            "POST",
            "/v1/api/functions/fn-r/rollback",
            Some(json!({"version": "1.0.0"})),
        ),
    )
    .await;
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rolled-back");
    assert_eq!(body["version"], "1.0.0");

    // Same invoke now behaves like v1. The input differs from the first
    // call so the dedup map cannot coalesce them.
    let resp = send(
        &app,
        request("POST", "/v1/functions/fn-r", Some(json!({"n": 2}))),
    )
    .await;
    let (_, body) = json_of(resp).await;
    assert_eq!(body["entryPoint"], "v1.js");
}

// ---------------------------------------------------------------------------
// Invoke error paths and logs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invoking_an_unknown_function_is_404() {
    let (_state, app) = harness(|_| {}, ExecutorBindings::default());

    let resp = send(&app, request("POST", "/v1/functions/ghost", Some(json!({})))).await;
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not-found");
    assert!(body["correlationId"].is_string());
}

#[tokio::test]
async fn missing_binding_surfaces_503_envelope() {
    let (state, app) = harness(|_| {}, ExecutorBindings::default());
    seed(&state, metadata("gen", "1.0.0", generative_kind("x")), None).await;

    let resp = send(&app, request("POST", "/v1/functions/gen", Some(json!({})))).await;
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("messages.create"));
}

#[tokio::test]
async fn human_invocation_returns_202_task() {
    let tasks = Arc::new(MemoryHumanTasks::new());
    let bindings = ExecutorBindings {
        human_tasks: Some(Arc::clone(&tasks) as _),
        ..Default::default()
    };
    let (state, app) = harness(|_| {}, bindings);
    seed(
        &state,
        metadata(
            "approve-spend",
            "1.0.0",
            FunctionKind::Human(ff_core::HumanFunction {
                interaction_type: ff_core::InteractionType::Approval,
                ui: None,
                assignees: vec![],
                sla: None,
                reminders: vec![],
                escalation: None,
            }),
        ),
        None,
    )
    .await;

    let resp = send(
        &app,
        request(
            "POST",
            "/v1/functions/approve-spend",
            Some(json!({"amount": 120})),
        ),
    )
    .await;
    let (status, body) = json_of(resp).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["taskStatus"], "pending");
    assert!(body["taskId"].is_string());
    assert_eq!(tasks.created_count(), 1);
}

#[tokio::test]
async fn logs_stream_replays_invocation_lines() {
    let client = Arc::new(ScriptedModelClient::new());
    let bindings = ExecutorBindings {
        model: Some(client as _),
        ..Default::default()
    };
    let (state, app) = harness(|_| {}, bindings);
    seed(&state, metadata("chatty", "1.0.0", generative_kind("x")), None).await;

    send(&app, request("POST", "/v1/functions/chatty", Some(json!({})))).await;

    let resp = send(&app, request("GET", "/v1/functions/chatty/logs", None)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("invocation started"));
    assert!(text.contains("invocation finished with status 200"));
}
