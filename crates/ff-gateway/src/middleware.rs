// SPDX-License-Identifier: MIT OR Apache-2.0
//! Middleware stack: correlation ids, request logging, the body-size
//! gate, credential resolution, and rate-limit admission. Order on the
//! wire is correlation → logging → size gate → auth → rate limit →
//! handler.

use crate::AppState;
use crate::envelope::{ApiError, CorrelationId};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ff_auth::CredentialSource;
use ff_core::{ErrorKind, MAX_DEPLOY_BODY_BYTES};
use ff_limit::{RateLimitOutcome, RateLimitRequest};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn correlation_of(request: &Request) -> CorrelationId {
    request
        .extensions()
        .get::<CorrelationId>()
        .cloned()
        .unwrap_or_else(|| CorrelationId("unknown".into()))
}

// ---------------------------------------------------------------------------
// Correlation id
// ---------------------------------------------------------------------------

/// Read `X-Request-ID` (or generate a UUIDv4), stash it as an extension,
/// and echo it on the response.
pub async fn correlation_middleware(mut request: Request, next: Next) -> Response {
    let id = header_str(request.headers(), "x-request-id")
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    request.extensions_mut().insert(CorrelationId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

// ---------------------------------------------------------------------------
// Request logging
// ---------------------------------------------------------------------------

/// Log method, path, status, and duration with structured fields.
pub async fn request_logger(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        http.method = %method,
        http.path = %path,
        http.status = response.status().as_u16(),
        http.duration_ms = started.elapsed().as_millis() as u64,
        "request completed"
    );
    response
}

// ---------------------------------------------------------------------------
// Body-size gate
// ---------------------------------------------------------------------------

/// Reject declared bodies over the deploy cap with a 413 envelope before
/// reading a byte.
pub async fn body_size_gate(request: Request, next: Next) -> Response {
    let declared = header_str(request.headers(), "content-length")
        .and_then(|v| v.parse::<usize>().ok());
    if let Some(length) = declared
        && length > MAX_DEPLOY_BODY_BYTES
    {
        let correlation = correlation_of(&request);
        return ApiError::new(
            ErrorKind::PayloadTooLarge,
            format!("body of {length} bytes exceeds the {MAX_DEPLOY_BODY_BYTES}-byte limit"),
        )
        .with_correlation(&correlation)
        .into_response();
    }
    next.run(request).await
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// Resolve the caller and attach the principal; public paths pass through
/// without one.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let correlation = correlation_of(&request);
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let custom = state
        .custom_credential_header
        .as_deref()
        .and_then(|name| header_str(request.headers(), name));
    let x_api_key = header_str(request.headers(), "x-api-key");
    let authorization = header_str(request.headers(), "authorization");
    let internal = header_str(request.headers(), &state.internal_header_name);

    let credentials = CredentialSource {
        custom_header: custom.as_deref(),
        x_api_key: x_api_key.as_deref(),
        authorization: authorization.as_deref(),
        internal_header: internal.as_deref(),
    };

    match state.auth.resolve(&method, &path, credentials).await {
        Ok(Some(principal)) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Ok(None) => next.run(request).await,
        Err(error) => ApiError::from(error)
            .with_correlation(&correlation)
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Client address resolution order: `CF-Connecting-IP`,
/// `X-Forwarded-For` (first hop), `X-Real-IP`.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> String {
    if let Some(ip) = header_str(headers, "cf-connecting-ip") {
        return ip;
    }
    if let Some(forwarded) = header_str(headers, "x-forwarded-for")
        && let Some(first) = forwarded.split(',').next()
    {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    header_str(headers, "x-real-ip").unwrap_or_else(|| "unknown".into())
}

/// Function id from invoke-shaped paths, for the `function` limiter
/// category.
fn path_function_id(path: &str) -> Option<String> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    match (segments.next(), segments.next(), segments.next()) {
        (Some("v1"), Some("functions" | "cascade"), Some(id)) => Some(id.to_string()),
        _ => None,
    }
}

/// Admit or deny the request: endpoint → custom → function → ip, first
/// denial wins; allowed requests carry `X-RateLimit-*` headers.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let correlation = correlation_of(&request);
    let ip = client_ip(request.headers());
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let function_id = path_function_id(&path);

    let outcome = state.limits.check(&RateLimitRequest {
        ip: &ip,
        method: &method,
        path: &path,
        function_id: function_id.as_deref(),
        custom_key: None,
    });

    match outcome {
        RateLimitOutcome::Bypassed => next.run(request).await,
        RateLimitOutcome::Allowed(decision) => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            let entries = [
                ("x-ratelimit-limit", decision.limit.to_string()),
                ("x-ratelimit-remaining", decision.remaining.to_string()),
                ("x-ratelimit-reset", decision.reset_at_unix().to_string()),
            ];
            for (name, value) in entries {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.insert(name, value);
                }
            }
            response
        }
        RateLimitOutcome::Denied { category, decision } => {
            let retry_after = decision.retry_after_secs();
            ApiError::new(
                ErrorKind::RateLimit,
                format!("rate limit exceeded for {category}"),
            )
            .with_correlation(&correlation)
            .with_context(json!({
                "category": category.as_str(),
                "retryAfter": retry_after,
                "limit": decision.limit,
            }))
            .with_header("Retry-After", retry_after.to_string())
            .with_header("X-RateLimit-Limit", decision.limit.to_string())
            .with_header("X-RateLimit-Remaining", "0")
            .with_header("X-RateLimit-Reset", decision.reset_at_unix().to_string())
            .into_response()
        }
    }
}
