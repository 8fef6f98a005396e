// SPDX-License-Identifier: MIT OR Apache-2.0
//! Auth introspection: `/v1/api/auth/{validate,me,orgs}`.

use crate::envelope::{ApiError, CorrelationId};
use axum::Json;
use axum::extract::Extension;
use axum::response::{IntoResponse, Response};
use ff_auth::Principal;
use ff_core::ErrorKind;
use serde_json::json;

fn require_principal(
    principal: Option<Extension<Principal>>,
    correlation: &CorrelationId,
) -> Result<Principal, Box<ApiError>> {
    principal.map(|Extension(p)| p).ok_or_else(|| {
        Box::new(
            ApiError::new(ErrorKind::Authentication, "missing credential")
                .with_correlation(correlation),
        )
    })
}

/// GET `/v1/api/auth/validate`.
pub async fn validate(
    Extension(correlation): Extension<CorrelationId>,
    principal: Option<Extension<Principal>>,
) -> Response {
    match require_principal(principal, &correlation) {
        Ok(p) => Json(json!({
            "valid": true,
            "principal": {
                "subject": p.subject,
                "kind": p.kind,
                "scopes": p.scopes,
                "keyHint": p.key_hint,
            },
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET `/v1/api/auth/me`.
pub async fn me(
    Extension(correlation): Extension<CorrelationId>,
    principal: Option<Extension<Principal>>,
) -> Response {
    match require_principal(principal, &correlation) {
        Ok(p) => Json(json!({
            "userId": p.user_id,
            "email": p.email,
            "orgIds": p.org_ids,
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET `/v1/api/auth/orgs`.
pub async fn orgs(
    Extension(correlation): Extension<CorrelationId>,
    principal: Option<Extension<Principal>>,
) -> Response {
    match require_principal(principal, &correlation) {
        Ok(p) => Json(json!({ "organizations": p.org_ids })).into_response(),
        Err(e) => e.into_response(),
    }
}
