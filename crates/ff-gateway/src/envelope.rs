// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error envelope and correlation ids.
//!
//! Every error leaves the gateway as JSON
//! `{error, code, correlationId, context?}` with the status fixed by its
//! [`ErrorKind`]. Authentication errors add `WWW-Authenticate`;
//! rate-limit errors add `Retry-After` and the `X-RateLimit-*` family
//! (attached by the middleware that produced them).

use axum::Json;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use ff_auth::AuthError;
use ff_core::{ErrorKind, ValidationError};
use ff_dedup::ResponseSnapshot;
use ff_loader::FunctionLoadError;
use ff_store::StoreError;
use serde_json::{Value, json};

/// Realm advertised on 401 responses.
pub const AUTH_REALM: &str = "function-fabric";

/// Correlation id attached to the request as an extension; read from
/// `X-Request-ID` or generated.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

/// The gateway error envelope.
#[derive(Debug)]
pub struct ApiError {
    /// Taxonomy kind (fixes status and wire code).
    pub kind: ErrorKind,
    /// Human-readable message (the `error` field).
    pub message: String,
    /// Correlation id echoed in the body.
    pub correlation_id: Option<String>,
    /// Structured context.
    pub context: Option<Value>,
    /// Extra headers (e.g. `Retry-After`).
    pub headers: Vec<(String, String)>,
}

impl ApiError {
    /// Build an envelope.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            correlation_id: None,
            context: None,
            headers: Vec::new(),
        }
    }

    /// Attach the correlation id.
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: &CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id.0.clone());
        self
    }

    /// Attach structured context.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Attach a response header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The JSON body of this envelope.
    #[must_use]
    pub fn body(&self) -> Value {
        let mut body = json!({
            "error": self.message,
            "code": self.kind.as_code(),
            "correlationId": self.correlation_id,
        });
        if let (Some(context), Value::Object(map)) = (&self.context, &mut body) {
            map.insert("context".into(), context.clone());
        }
        body
    }

    /// Render into a dedup snapshot so error responses can be shared with
    /// coalesced waiters.
    #[must_use]
    pub fn into_snapshot(self) -> ResponseSnapshot {
        let mut headers = vec![(
            "content-type".to_string(),
            "application/json".to_string(),
        )];
        headers.extend(self.response_headers());
        ResponseSnapshot {
            status: self.kind.http_status(),
            headers,
            body: serde_json::to_vec(&self.body()).unwrap_or_default(),
        }
    }

    fn response_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.headers.clone();
        if self.kind == ErrorKind::Authentication
            && !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("www-authenticate"))
        {
            headers.push((
                "WWW-Authenticate".into(),
                format!("Bearer realm=\"{AUTH_REALM}\""),
            ));
        }
        headers
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let headers = self.response_headers();
        let mut response = (status, Json(self.body())).into_response();
        for (name, value) in headers {
            if let (Ok(name), Ok(value)) = (
                name.parse::<HeaderName>(),
                HeaderValue::from_str(&value),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

impl From<ValidationError> for ApiError {
    fn from(error: ValidationError) -> Self {
        let kind = error.kind();
        Self::new(kind, error.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        let kind = error.kind();
        Self::new(kind, error.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        let kind = error.kind();
        Self::new(kind, error.to_string())
    }
}

impl From<FunctionLoadError> for ApiError {
    fn from(error: FunctionLoadError) -> Self {
        let kind = error.kind.error_kind();
        let context = json!({
            "functionId": error.function_id,
            "retryCount": error.retry_count,
            "circuitBreakerState": error.breaker_state,
            "coalesced": error.is_coalesced_request,
        });
        Self::new(kind, error.to_string()).with_context(context)
    }
}
