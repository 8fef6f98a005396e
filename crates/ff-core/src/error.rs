// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error taxonomy for the serving pipeline.
//!
//! Kinds, not types: every error surfaced to a client maps onto one of the
//! kinds below, which fixes its HTTP status and stable wire code. Crates on
//! the hot path define their own typed errors and expose a `kind()`
//! accessor; the gateway shapes the final JSON envelope.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Client-visible error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Malformed body, bad id/version/language, schema too large,
    /// out-of-range parameters.
    Validation,
    /// Missing, invalid, or expired credential; no auth backend configured.
    Authentication,
    /// Credential valid but scopes insufficient.
    Authorization,
    /// Unknown route, function, or version.
    NotFound,
    /// Path exists under a different method.
    MethodNotAllowed,
    /// Body exceeds the deploy size gate.
    PayloadTooLarge,
    /// Rate limiter denied the request.
    RateLimit,
    /// Handler or executor failure; no successful cascade step.
    Invocation,
    /// Unexpected internal failure.
    Internal,
    /// Unknown function kind or unsupported handler (inline tools).
    NotImplemented,
    /// Upstream dependency returned garbage.
    BadGateway,
    /// Required binding absent or dependency unhealthy.
    ServiceUnavailable,
    /// Tier budget exceeded.
    Timeout,
}

impl ErrorKind {
    /// HTTP status for this kind.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Authentication => 401,
            Self::Authorization => 403,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::PayloadTooLarge => 413,
            Self::RateLimit => 429,
            Self::Invocation | Self::Internal => 500,
            Self::NotImplemented => 501,
            Self::BadGateway => 502,
            Self::ServiceUnavailable => 503,
            Self::Timeout => 504,
        }
    }

    /// Stable wire code carried in the error envelope.
    #[must_use]
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::NotFound => "not-found",
            Self::MethodNotAllowed => "method-not-allowed",
            Self::PayloadTooLarge => "payload-too-large",
            Self::RateLimit => "rate-limit",
            Self::Invocation => "invocation",
            Self::Internal => "internal",
            Self::NotImplemented => "not-implemented",
            Self::BadGateway => "bad-gateway",
            Self::ServiceUnavailable => "service-unavailable",
            Self::Timeout => "timeout",
        }
    }

    /// Whether a client may retry after a delay.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Timeout | Self::BadGateway | Self::ServiceUnavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_taxonomy_table() {
        assert_eq!(ErrorKind::Validation.http_status(), 400);
        assert_eq!(ErrorKind::Authentication.http_status(), 401);
        assert_eq!(ErrorKind::Authorization.http_status(), 403);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::MethodNotAllowed.http_status(), 405);
        assert_eq!(ErrorKind::PayloadTooLarge.http_status(), 413);
        assert_eq!(ErrorKind::RateLimit.http_status(), 429);
        assert_eq!(ErrorKind::Invocation.http_status(), 500);
        assert_eq!(ErrorKind::NotImplemented.http_status(), 501);
        assert_eq!(ErrorKind::ServiceUnavailable.http_status(), 503);
        assert_eq!(ErrorKind::Timeout.http_status(), 504);
    }

    #[test]
    fn retryable_kinds_carry_retry_after() {
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
    }
}
