// SPDX-License-Identifier: MIT OR Apache-2.0
//! ff-dispatch
//!
//! Routes a loaded stub to the executor for its kind, enforces the tier
//! timeout budget at the executor boundary, shapes the uniform
//! `{status, body + _meta}` response, and runs cascade pipelines with
//! output → input chaining. Agentic executors are cached per function id
//! so their tool registries are built once.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use ff_core::{CascadeFunction, ErrorKind, FunctionKind, FunctionStub, Tier};
use ff_exec::bindings::{BindingError, FunctionInvoker};
use ff_exec::{
    AgenticExecutor, CodeExecutor, ExecError, ExecutionMeta, ExecutorBindings,
    GenerativeExecutor, HumanExecutor,
};
use ff_loader::FunctionLoader;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Per-tier timeout budgets.
#[derive(Debug, Clone)]
pub struct TierBudgets {
    /// Tier 1 budget.
    pub code: Duration,
    /// Tier 2 budget.
    pub generative: Duration,
    /// Tier 3 budget.
    pub agentic: Duration,
    /// Tier 4 budget.
    pub human: Duration,
}

impl Default for TierBudgets {
    fn default() -> Self {
        Self {
            code: Tier::Code.default_budget(),
            generative: Tier::Generative.default_budget(),
            agentic: Tier::Agentic.default_budget(),
            human: Tier::Human.default_budget(),
        }
    }
}

impl TierBudgets {
    /// Budget for `tier`.
    #[must_use]
    pub fn budget_for(&self, tier: Tier) -> Duration {
        match tier {
            Tier::Code => self.code,
            Tier::Generative => self.generative,
            Tier::Agentic => self.agentic,
            Tier::Human => self.human,
        }
    }
}

/// Uniform dispatch response: status plus a body with `_meta` merged in.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// HTTP status.
    pub status: u16,
    /// Response body (always carries `_meta`).
    pub body: Value,
}

impl DispatchOutcome {
    /// Whether the outcome counts as a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// The tier dispatcher.
pub struct Dispatcher {
    loader: Arc<FunctionLoader>,
    budgets: TierBudgets,
    code: CodeExecutor,
    generative: GenerativeExecutor,
    human: HumanExecutor,
    bindings: ExecutorBindings,
    agentic_cache: Mutex<HashMap<String, Arc<AgenticExecutor>>>,
}

impl Dispatcher {
    /// Build the dispatcher. Unless the caller wired its own
    /// [`FunctionInvoker`], `function` tools dispatch back through this
    /// dispatcher.
    pub fn new(
        loader: Arc<FunctionLoader>,
        mut bindings: ExecutorBindings,
        budgets: TierBudgets,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            if bindings.invoker.is_none() {
                bindings.invoker = Some(Arc::new(NestedInvoker {
                    dispatcher: weak.clone(),
                }));
            }
            Self {
                loader,
                budgets,
                code: CodeExecutor::new(bindings.code_runtime.clone()),
                generative: GenerativeExecutor::new(bindings.model.clone()),
                human: HumanExecutor::new(bindings.human_tasks.clone()),
                bindings,
                agentic_cache: Mutex::new(HashMap::new()),
            }
        })
    }

    /// Dispatch `stub` with `input`.
    pub async fn dispatch(&self, stub: &FunctionStub, input: Value) -> DispatchOutcome {
        self.dispatch_boxed(stub.clone(), input).await
    }

    fn dispatch_boxed(&self, stub: FunctionStub, input: Value) -> BoxFuture<'_, DispatchOutcome> {
        Box::pin(async move {
            match stub.metadata.kind.clone() {
                FunctionKind::Cascade(cascade) => {
                    self.run_cascade(&stub.metadata.id, &cascade, input).await
                }
                _ => self.run_executor(&stub, input).await,
            }
        })
    }

    // -- single-tier execution --------------------------------------------

    async fn run_executor(&self, stub: &FunctionStub, input: Value) -> DispatchOutcome {
        // Kinds without a tier are cascades, handled above; `code` is the
        // documented default for anything else.
        let tier = stub.metadata.kind.tier().unwrap_or(Tier::Code);
        let budget = self.budgets.budget_for(tier);
        let started = Instant::now();

        let result = tokio::time::timeout(budget, async {
            match &stub.metadata.kind {
                FunctionKind::Code(_) => self.code.execute(stub, &input).await,
                FunctionKind::Generative(_) => self.generative.execute(stub, &input).await,
                FunctionKind::Agentic(spec) => {
                    let executor = self.agentic_executor(&stub.metadata.id, spec)?;
                    executor.execute(&input).await
                }
                FunctionKind::Human(_) => self.human.execute(stub, &input).await,
                FunctionKind::Cascade(_) => Err(ExecError::Backend {
                    message: "cascade reached the executor boundary".into(),
                }),
            }
        })
        .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(Ok(execution)) => DispatchOutcome {
                status: execution.status,
                body: merge_meta(execution.body, &execution.meta),
            },
            Ok(Err(error)) => {
                debug!(
                    function = %stub.metadata.id,
                    error = %error,
                    "executor failed"
                );
                let kind = error.kind();
                error_outcome(
                    kind,
                    error.to_string(),
                    executor_label(tier),
                    tier.number(),
                    duration_ms,
                )
            }
            Err(_elapsed) => {
                warn!(
                    function = %stub.metadata.id,
                    tier = tier.number(),
                    budget_ms = budget.as_millis() as u64,
                    "execution exceeded tier budget"
                );
                // The breaker treats a budget overrun like any other
                // failure of this function.
                self.loader.note_execution_failure(&stub.metadata.id);
                error_outcome(
                    ErrorKind::Timeout,
                    format!(
                        "execution exceeded the tier {} budget of {}s",
                        tier.number(),
                        budget.as_secs()
                    ),
                    executor_label(tier),
                    tier.number(),
                    duration_ms,
                )
            }
        }
    }

    fn agentic_executor(
        &self,
        function_id: &str,
        spec: &ff_core::AgenticFunction,
    ) -> Result<Arc<AgenticExecutor>, ExecError> {
        {
            let cache = self.agentic_cache.lock().expect("agentic cache poisoned");
            if let Some(executor) = cache.get(function_id) {
                return Ok(Arc::clone(executor));
            }
        }
        let executor = Arc::new(AgenticExecutor::build(function_id, spec, &self.bindings)?);
        self.agentic_cache
            .lock()
            .expect("agentic cache poisoned")
            .insert(function_id.to_string(), Arc::clone(&executor));
        Ok(executor)
    }

    // -- cascades ----------------------------------------------------------

    async fn run_cascade(
        &self,
        cascade_id: &str,
        cascade: &CascadeFunction,
        input: Value,
    ) -> DispatchOutcome {
        use ff_core::ErrorHandling;

        let started = Instant::now();
        let fail_fast = cascade.error_handling == ErrorHandling::FailFast;

        let mut tiers_attempted: Vec<String> = Vec::new();
        let mut step_outcomes: Vec<Value> = Vec::new();
        let mut steps_executed = 0u32;
        let mut current_input = input;
        let mut last_success: Option<Value> = None;

        for step in &cascade.steps {
            tiers_attempted.push(step.tier.to_string());

            let loaded = match self.loader.load(&step.function_id).await {
                Ok(loaded) => loaded,
                Err(error) => {
                    warn!(
                        cascade = cascade_id,
                        step = %step.function_id,
                        error = %error,
                        "cascade step failed to resolve"
                    );
                    let kind = error.kind.error_kind();
                    step_outcomes.push(json!({
                        "functionId": step.function_id,
                        "tier": step.tier,
                        "status": kind.http_status(),
                        "error": error.to_string(),
                    }));
                    if fail_fast {
                        return cascade_error(
                            kind,
                            error.to_string(),
                            &tiers_attempted,
                            steps_executed,
                            &step_outcomes,
                            started,
                        );
                    }
                    continue;
                }
            };

            let outcome = self
                .dispatch_boxed(loaded.stub, current_input.clone())
                .await;
            steps_executed += 1;

            step_outcomes.push(json!({
                "functionId": step.function_id,
                "tier": step.tier,
                "status": outcome.status,
            }));

            if outcome.is_success() {
                // The step's output (minus _meta) feeds the next step.
                let body = strip_meta(outcome.body);
                current_input = body.clone();
                last_success = Some(body);
            } else if fail_fast {
                let mut body = outcome.body;
                attach_cascade_meta(
                    &mut body,
                    &tiers_attempted,
                    steps_executed,
                    &step_outcomes,
                    started,
                );
                return DispatchOutcome {
                    status: outcome.status,
                    body,
                };
            }
        }

        match last_success {
            Some(mut body) => {
                attach_cascade_meta(
                    &mut body,
                    &tiers_attempted,
                    steps_executed,
                    &step_outcomes,
                    started,
                );
                DispatchOutcome { status: 200, body }
            }
            None => cascade_error(
                ErrorKind::Invocation,
                "no successful steps".into(),
                &tiers_attempted,
                steps_executed,
                &step_outcomes,
                started,
            ),
        }
    }
}

/// Nested dispatch used by `function` tools.
struct NestedInvoker {
    dispatcher: Weak<Dispatcher>,
}

#[async_trait]
impl FunctionInvoker for NestedInvoker {
    async fn invoke(&self, function_id: &str, input: Value) -> Result<Value, BindingError> {
        let dispatcher = self
            .dispatcher
            .upgrade()
            .ok_or_else(|| BindingError::new("dispatcher is gone"))?;
        let loaded = dispatcher
            .loader
            .load(function_id)
            .await
            .map_err(|e| BindingError::new(e.to_string()))?;
        let outcome = dispatcher.dispatch(&loaded.stub, input).await;
        if !outcome.is_success() {
            return Err(BindingError::new(format!(
                "nested function '{function_id}' returned {}",
                outcome.status
            )));
        }
        Ok(strip_meta(outcome.body))
    }
}

// ---------------------------------------------------------------------------
// Body shaping
// ---------------------------------------------------------------------------

fn executor_label(tier: Tier) -> &'static str {
    match tier {
        Tier::Code => ff_exec::code::EXECUTOR_TYPE,
        Tier::Generative => ff_exec::generative::EXECUTOR_TYPE,
        Tier::Agentic => ff_exec::agentic::EXECUTOR_TYPE,
        Tier::Human => ff_exec::human::EXECUTOR_TYPE,
    }
}

/// Merge a serialized `_meta` block into `body`. Non-object bodies are
/// wrapped as `{"result": body}` first.
fn merge_meta(body: Value, meta: &ExecutionMeta) -> Value {
    let meta_value = serde_json::to_value(meta).unwrap_or_else(|_| json!({}));
    match body {
        Value::Object(mut map) => {
            map.insert("_meta".into(), meta_value);
            Value::Object(map)
        }
        other => json!({ "result": other, "_meta": meta_value }),
    }
}

/// Remove `_meta` before chaining a step's output into the next input.
fn strip_meta(body: Value) -> Value {
    match body {
        Value::Object(mut map) => {
            map.remove("_meta");
            Value::Object(map)
        }
        other => other,
    }
}

fn cascade_meta(
    tiers_attempted: &[String],
    steps_executed: u32,
    step_outcomes: &[Value],
    started: Instant,
) -> Value {
    json!({
        "executorType": "cascade",
        "tiersAttempted": tiers_attempted,
        "stepsExecuted": steps_executed,
        "steps": step_outcomes,
        "durationMs": started.elapsed().as_millis() as u64,
    })
}

fn attach_cascade_meta(
    body: &mut Value,
    tiers_attempted: &[String],
    steps_executed: u32,
    step_outcomes: &[Value],
    started: Instant,
) {
    let meta = cascade_meta(tiers_attempted, steps_executed, step_outcomes, started);
    match body {
        Value::Object(map) => {
            map.insert("_meta".into(), meta);
        }
        other => {
            *other = json!({ "result": other.clone(), "_meta": meta });
        }
    }
}

fn cascade_error(
    kind: ErrorKind,
    message: String,
    tiers_attempted: &[String],
    steps_executed: u32,
    step_outcomes: &[Value],
    started: Instant,
) -> DispatchOutcome {
    DispatchOutcome {
        status: kind.http_status(),
        body: json!({
            "error": message,
            "code": kind.as_code(),
            "_meta": cascade_meta(tiers_attempted, steps_executed, step_outcomes, started),
        }),
    }
}

fn error_outcome(
    kind: ErrorKind,
    message: String,
    executor_type: &str,
    tier: u8,
    duration_ms: u64,
) -> DispatchOutcome {
    DispatchOutcome {
        status: kind.http_status(),
        body: json!({
            "error": message,
            "code": kind.as_code(),
            "_meta": {
                "executorType": executor_type,
                "tier": tier,
                "durationMs": duration_ms,
            },
        }),
    }
}
