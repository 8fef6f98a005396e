// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deploy CRUD: create, list, inspect, patch, delete, rollback.

use crate::AppState;
use crate::audit::AuditEvent;
use crate::envelope::{ApiError, CorrelationId};
use crate::middleware::client_ip;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use ff_auth::Principal;
use ff_core::validate::{validate_deploy, validate_version};
use ff_core::{CodeArtifact, ErrorKind, FunctionKind, artifact::WASM_MAGIC};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

fn parse_json(body: &Bytes, correlation: &CorrelationId) -> Result<Value, Box<ApiError>> {
    if body.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_slice(body).map_err(|e| {
        Box::new(
            ApiError::new(
                ErrorKind::Validation,
                format!("body is not valid JSON: {e}"),
            )
            .with_correlation(correlation),
        )
    })
}

fn principal_user(principal: &Option<Extension<Principal>>) -> Option<String> {
    principal
        .as_ref()
        .and_then(|Extension(p)| p.user_id.clone().or_else(|| Some(p.subject.clone())))
}

// ---------------------------------------------------------------------------
// POST /v1/api/functions
// ---------------------------------------------------------------------------

/// Deploy a function: validate the kind-typed body, store code, register
/// metadata, emit an audit event.
pub async fn deploy(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
    principal: Option<Extension<Principal>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ip = client_ip(&headers);
    let user_id = principal_user(&principal);

    let body = match parse_json(&body, &correlation) {
        Ok(v) => v,
        Err(e) => return e.into_response(),
    };

    let has_code = body.get("code").and_then(Value::as_str).is_some();
    let mut metadata = match validate_deploy(&body, has_code) {
        Ok(m) => m,
        Err(error) => {
            state.audit.record(AuditEvent {
                timestamp: Utc::now(),
                user_id,
                action: "deploy".into(),
                resource: "function:(invalid)".into(),
                status: "failure".into(),
                details: Some(json!({ "error": error.to_string() })),
                ip: Some(ip),
            });
            return ApiError::from(error)
                .with_correlation(&correlation)
                .into_response();
        }
    };

    let now = Utc::now();
    metadata.created_at = Some(now);
    metadata.updated_at = Some(now);

    if let Some(source) = body.get("code").and_then(Value::as_str) {
        let FunctionKind::Code(code_fn) = &metadata.kind else {
            return ApiError::new(
                ErrorKind::Validation,
                "code artifacts are only accepted for code functions",
            )
            .with_correlation(&correlation)
            .into_response();
        };

        let source_map = body.get("sourceMap").and_then(Value::as_str);
        let artifact = CodeArtifact::Text {
            content: source.to_string(),
            source_map: source_map.map(str::to_string),
        };
        if let Err(error) = state
            .code_store
            .put(&metadata.id, &metadata.version, &artifact)
            .await
        {
            return ApiError::from(error)
                .with_correlation(&correlation)
                .into_response();
        }
        if let Some(map) = source_map
            && let Err(error) = state.code_store.put_source_map(&metadata.id, map).await
        {
            return ApiError::from(error)
                .with_correlation(&correlation)
                .into_response();
        }

        if code_fn.language.requires_compilation() {
            match &state.compiler {
                Some(compiler) => {
                    match compiler.compile(code_fn.language, source).await {
                        Ok(bytes) => {
                            let compiled = if bytes.len() >= 8 && bytes[..4] == WASM_MAGIC {
                                CodeArtifact::Binary {
                                    bytes,
                                    exports: None,
                                }
                            } else {
                                CodeArtifact::Text {
                                    content: String::from_utf8_lossy(&bytes).into_owned(),
                                    source_map: None,
                                }
                            };
                            if let Err(error) =
                                state.code_store.put_compiled(&metadata.id, &compiled).await
                            {
                                return ApiError::from(error)
                                    .with_correlation(&correlation)
                                    .into_response();
                            }
                        }
                        Err(error) => {
                            return ApiError::new(
                                ErrorKind::Validation,
                                format!(
                                    "compilation failed for {}: {}",
                                    code_fn.language, error.message
                                ),
                            )
                            .with_correlation(&correlation)
                            .into_response();
                        }
                    }
                }
                None => {
                    warn!(
                        function = %metadata.id,
                        language = %code_fn.language,
                        "no compiler bound; storing source only"
                    );
                }
            }
        }
    }

    if let Err(error) = state.registry.put(&metadata).await {
        state.audit.record(AuditEvent {
            timestamp: Utc::now(),
            user_id,
            action: "deploy".into(),
            resource: format!("function:{}", metadata.id),
            status: "failure".into(),
            details: Some(json!({ "error": error.to_string() })),
            ip: Some(ip),
        });
        return ApiError::from(error)
            .with_correlation(&correlation)
            .into_response();
    }

    state.audit.record(AuditEvent {
        timestamp: Utc::now(),
        user_id,
        action: "deploy".into(),
        resource: format!("function:{}", metadata.id),
        status: "success".into(),
        details: Some(json!({
            "version": metadata.version,
            "kind": metadata.kind.label(),
        })),
        ip: Some(ip),
    });

    (
        StatusCode::CREATED,
        Json(json!({
            "id": metadata.id,
            "version": metadata.version,
            "kind": metadata.kind.label(),
            "status": "deployed",
            "url": format!("/v1/functions/{}", metadata.id),
        })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/api/functions
// ---------------------------------------------------------------------------

/// List deployed functions.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
) -> Response {
    match state.registry.list().await {
        Ok(functions) => Json(json!({
            "functions": functions,
            "count": functions.len(),
        }))
        .into_response(),
        Err(error) => ApiError::from(error)
            .with_correlation(&correlation)
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/api/functions/{id}
// ---------------------------------------------------------------------------

/// Metadata for one function.
pub async fn info(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
) -> Response {
    match state.registry.get_latest(&id).await {
        Ok(Some(metadata)) => Json(metadata).into_response(),
        Ok(None) => ApiError::new(ErrorKind::NotFound, format!("function '{id}' not found"))
            .with_correlation(&correlation)
            .into_response(),
        Err(error) => ApiError::from(error)
            .with_correlation(&correlation)
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// PATCH /v1/api/functions/{id}
// ---------------------------------------------------------------------------

const IMMUTABLE_FIELDS: &[&str] = &["id", "version", "kind"];

/// Update mutable metadata fields (name, description, tags).
pub async fn update(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let patch = match parse_json(&body, &correlation) {
        Ok(v) => v,
        Err(e) => return e.into_response(),
    };

    let mut metadata = match state.registry.get_latest(&id).await {
        Ok(Some(m)) => m,
        Ok(None) => {
            return ApiError::new(ErrorKind::NotFound, format!("function '{id}' not found"))
                .with_correlation(&correlation)
                .into_response();
        }
        Err(error) => {
            return ApiError::from(error)
                .with_correlation(&correlation)
                .into_response();
        }
    };

    for field in IMMUTABLE_FIELDS {
        if patch.get(*field).is_some() {
            return ApiError::new(
                ErrorKind::Validation,
                format!("field '{field}' is immutable"),
            )
            .with_correlation(&correlation)
            .into_response();
        }
    }

    if let Some(name) = patch.get("name") {
        metadata.name = name.as_str().map(str::to_string);
    }
    if let Some(description) = patch.get("description") {
        metadata.description = description.as_str().map(str::to_string);
    }
    if let Some(tags) = patch.get("tags").and_then(Value::as_array) {
        metadata.tags = tags
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }
    metadata.updated_at = Some(Utc::now());

    if let Err(error) = state.registry.replace(&metadata).await {
        return ApiError::from(error)
            .with_correlation(&correlation)
            .into_response();
    }
    Json(metadata).into_response()
}

// ---------------------------------------------------------------------------
// DELETE /v1/api/functions/{id}
// ---------------------------------------------------------------------------

/// Remove a function: metadata, code, cached stubs.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
    principal: Option<Extension<Principal>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    let ip = client_ip(&headers);
    let user_id = principal_user(&principal);

    let removed = match state.registry.delete(&id).await {
        Ok(removed) => removed,
        Err(error) => {
            return ApiError::from(error)
                .with_correlation(&correlation)
                .into_response();
        }
    };
    if !removed {
        return ApiError::new(ErrorKind::NotFound, format!("function '{id}' not found"))
            .with_correlation(&correlation)
            .into_response();
    }

    if let Err(error) = state.code_store.delete(&id).await {
        warn!(function = %id, error = %error, "code cleanup failed during delete");
    }
    state.loader.invalidate(&id).await;

    state.audit.record(AuditEvent {
        timestamp: Utc::now(),
        user_id,
        action: "delete".into(),
        resource: format!("function:{id}"),
        status: "success".into(),
        details: None,
        ip: Some(ip),
    });

    Json(json!({ "deleted": true, "id": id })).into_response()
}

// ---------------------------------------------------------------------------
// POST /v1/api/functions/{id}/rollback
// ---------------------------------------------------------------------------

/// Roll a function back to a pinned version and republish it as latest.
pub async fn rollback(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
    principal: Option<Extension<Principal>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let payload = match parse_json(&body, &correlation) {
        Ok(v) => v,
        Err(e) => return e.into_response(),
    };
    let Some(version) = payload.get("version").and_then(Value::as_str) else {
        return ApiError::new(ErrorKind::Validation, "missing required field: version")
            .with_correlation(&correlation)
            .into_response();
    };
    if let Err(error) = validate_version(version) {
        return ApiError::from(error)
            .with_correlation(&correlation)
            .into_response();
    }

    match state.loader.rollback(&id, version).await {
        Ok(loaded) => {
            state.audit.record(AuditEvent {
                timestamp: Utc::now(),
                user_id: principal_user(&principal),
                action: "rollback".into(),
                resource: format!("function:{id}"),
                status: "success".into(),
                details: Some(json!({ "version": version })),
                ip: Some(client_ip(&headers)),
            });
            Json(json!({
                "id": id,
                "version": loaded.stub.version,
                "status": "rolled-back",
            }))
            .into_response()
        }
        Err(error) => ApiError::from(error)
            .with_correlation(&correlation)
            .into_response(),
    }
}
