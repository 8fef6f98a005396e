// SPDX-License-Identifier: MIT OR Apache-2.0
//! Invoke and cascade paths.
//!
//! Invocations flow through the dedup map: the fingerprint is
//! `SHA-256(id ":" canonical_json(input))`, the leader loads and
//! dispatches, and waiters get a fresh response rebuilt from the leader's
//! snapshot with `X-Deduplicated: true`. Error responses (load failures,
//! executor errors) are snapshots too, so a failing invocation is also
//! executed at most once per fingerprint.

use crate::AppState;
use crate::envelope::{ApiError, CorrelationId};
use axum::body::{Body, Bytes};
use axum::extract::{Extension, Path, State};
use axum::http::Response as HttpResponse;
use axum::response::{IntoResponse, Response};
use ff_core::validate::validate_function_id;
use ff_core::{ErrorKind, FunctionKind, invocation_fingerprint};
use ff_dedup::{DedupResult, ExecutionFailure, ResponseSnapshot};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

/// POST `/v1/functions/{id}` and `/v1/functions/{id}/invoke`.
pub async fn invoke(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    invoke_inner(state, correlation, id, body, false).await
}

/// POST `/v1/cascade/{id}`: explicit cascade invocation.
pub async fn invoke_cascade(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    invoke_inner(state, correlation, id, body, true).await
}

async fn invoke_inner(
    state: Arc<AppState>,
    correlation: CorrelationId,
    id: String,
    body: Bytes,
    require_cascade: bool,
) -> Response {
    if let Err(error) = validate_function_id(&id) {
        return ApiError::from(error)
            .with_correlation(&correlation)
            .into_response();
    }

    let input: Value = if body.is_empty() {
        json!({})
    } else {
        match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                return ApiError::new(
                    ErrorKind::Validation,
                    format!("body is not valid JSON: {e}"),
                )
                .with_correlation(&correlation)
                .into_response();
            }
        }
    };

    let fingerprint = match invocation_fingerprint(&id, Some(&input)) {
        Ok(f) => f,
        Err(e) => {
            return ApiError::new(
                ErrorKind::Internal,
                format!("failed to fingerprint invocation: {e}"),
            )
            .with_correlation(&correlation)
            .into_response();
        }
    };

    let result = state
        .dedup
        .dedup_or_execute(&fingerprint, || {
            run_invocation(
                Arc::clone(&state),
                id.clone(),
                input.clone(),
                correlation.clone(),
                require_cascade,
            )
        })
        .await;

    snapshot_response(result, &correlation)
}

/// The leader path: load the stub, dispatch, snapshot the response.
async fn run_invocation(
    state: Arc<AppState>,
    id: String,
    input: Value,
    correlation: CorrelationId,
    require_cascade: bool,
) -> Result<ResponseSnapshot, ExecutionFailure> {
    let loaded = match state.loader.load(&id).await {
        Ok(loaded) => loaded,
        Err(error) => {
            state
                .logs
                .push(&id, "error", format!("load failed: {error}"));
            return Ok(ApiError::from(error)
                .with_correlation(&correlation)
                .into_snapshot());
        }
    };

    if require_cascade && !matches!(loaded.stub.metadata.kind, FunctionKind::Cascade(_)) {
        return Ok(ApiError::new(
            ErrorKind::Validation,
            format!("function '{id}' is not a cascade"),
        )
        .with_correlation(&correlation)
        .into_snapshot());
    }

    state.logs.push(
        &id,
        "info",
        format!(
            "invocation started (kind={}, version={})",
            loaded.stub.metadata.kind.label(),
            loaded.stub.version
        ),
    );
    debug!(function = %id, from_cache = loaded.from_cache, "dispatching");

    let outcome = state.dispatcher.dispatch(&loaded.stub, input).await;

    state.logs.push(
        &id,
        if outcome.is_success() { "info" } else { "error" },
        format!("invocation finished with status {}", outcome.status),
    );

    let mut body = outcome.body;
    if outcome.status >= 400
        && let Value::Object(map) = &mut body
    {
        map.entry("correlationId")
            .or_insert_with(|| json!(correlation.0));
    }

    Ok(ResponseSnapshot {
        status: outcome.status,
        headers: vec![("content-type".into(), "application/json".into())],
        body: serde_json::to_vec(&body).unwrap_or_default(),
    })
}

/// Materialize a fresh response from the snapshot; waiters get the
/// `X-Deduplicated` marker.
fn snapshot_response(
    result: Result<DedupResult, ExecutionFailure>,
    correlation: &CorrelationId,
) -> Response {
    let dedup = match result {
        Ok(dedup) => dedup,
        Err(failure) => {
            return ApiError::new(ErrorKind::Internal, failure.message)
                .with_correlation(correlation)
                .into_response();
        }
    };

    let mut builder = HttpResponse::builder().status(dedup.snapshot.status);
    for (name, value) in &dedup.snapshot.headers {
        builder = builder.header(name, value);
    }
    if dedup.deduplicated {
        builder = builder.header("X-Deduplicated", "true");
    }
    match builder.body(Body::from(dedup.snapshot.body)) {
        Ok(response) => response,
        Err(e) => ApiError::new(
            ErrorKind::Internal,
            format!("failed to build response: {e}"),
        )
        .with_correlation(correlation)
        .into_response(),
    }
}
