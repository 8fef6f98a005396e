// SPDX-License-Identifier: MIT OR Apache-2.0
//! ff-auth
//!
//! Credential resolution for the request pipeline. The resolver consumes a
//! [`CredentialSource`] the gateway extracts from request headers, checks
//! public-path and internal-header shortcuts, then authenticates against an
//! injected [`ApiKeyStore`] or [`OAuthValidator`]. When neither backend is
//! configured the resolver **denies by default**; there is no silent
//! allow.
//!
//! Principals never carry the raw credential: only the SHA-256 `key_hash`
//! and a `****<last4>` hint suitable for logs.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ff_core::{ErrorKind, sha256_hex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// API-key prefixes recognized as key-shaped credentials.
pub const DEFAULT_KEY_PREFIXES: &[&str] = &["sk_", "pk_", "fn_", "api_", "key_"];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Authentication and authorization failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No credential was presented on a protected route.
    #[error("missing credential")]
    MissingCredential,

    /// The presented API key is not in the store.
    #[error("unknown API key")]
    UnknownKey,

    /// The API key exists but is deactivated.
    #[error("API key is inactive")]
    InactiveKey,

    /// The API key exists but has expired.
    #[error("API key expired at {expired_at}")]
    ExpiredKey {
        /// Expiry timestamp from the key record.
        expired_at: DateTime<Utc>,
    },

    /// The bearer token failed OAuth validation.
    #[error("invalid bearer token")]
    InvalidToken,

    /// No API-key store and no OAuth validator are configured.
    #[error("no authentication backend configured")]
    NoBackendConfigured,

    /// The principal lacks required scopes.
    #[error("insufficient scope: requires {required:?}")]
    InsufficientScope {
        /// Scopes the route requires.
        required: Vec<String>,
    },

    /// The auth backend itself failed.
    #[error("auth backend failure: {message}")]
    Backend {
        /// Backend detail.
        message: String,
    },
}

impl AuthError {
    /// Taxonomy kind: 403 for scope failures, 503 for backend outages,
    /// 401 for everything else.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientScope { .. } => ErrorKind::Authorization,
            Self::Backend { .. } => ErrorKind::ServiceUnavailable,
            _ => ErrorKind::Authentication,
        }
    }
}

// ---------------------------------------------------------------------------
// Principals
// ---------------------------------------------------------------------------

/// How the principal authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    /// Internal-header shortcut.
    Internal,
    /// API key.
    ApiKey,
    /// OAuth bearer token.
    OAuth,
}

/// An authenticated caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Stable subject identifier.
    pub subject: String,
    /// Authentication mechanism.
    pub kind: PrincipalKind,
    /// Granted scopes; `*` matches everything.
    pub scopes: Vec<String>,
    /// SHA-256 of the presented credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_hash: Option<String>,
    /// Sanitized hint (`****<last4>`) for logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_hint: Option<String>,
    /// Resolved user id, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Resolved email, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Organizations the principal belongs to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub org_ids: Vec<String>,
}

impl Principal {
    /// The synthetic internal principal with the `*` scope.
    #[must_use]
    pub fn internal() -> Self {
        Self {
            subject: "internal".into(),
            kind: PrincipalKind::Internal,
            scopes: vec!["*".into()],
            key_hash: None,
            key_hint: None,
            user_id: None,
            email: None,
            org_ids: vec![],
        }
    }

    /// Whether the principal holds `scope` (or the `*` wildcard).
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == "*" || s == scope)
    }
}

/// Sanitized key hint: `****` plus the last four characters.
#[must_use]
pub fn key_hint(token: &str) -> String {
    let tail: String = token
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{tail}")
}

// ---------------------------------------------------------------------------
// Backend seams
// ---------------------------------------------------------------------------

/// A stored API-key record, keyed by `SHA-256(token)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Owning user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Organizations the key grants access to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub org_ids: Vec<String>,
    /// Granted scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Whether the key is active.
    pub active: bool,
    /// Optional expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Looks up API-key records by credential hash.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Fetch the record stored under `key_hash`.
    async fn get(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, AuthError>;
}

/// Identity derived from a validated OAuth token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthIdentity {
    /// Resolved user id.
    pub user_id: String,
    /// Resolved email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Granted scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Organizations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub org_ids: Vec<String>,
}

/// Validates bearer tokens against an external OAuth service.
#[async_trait]
pub trait OAuthValidator: Send + Sync {
    /// Validate `token`; `Ok(None)` means the token is well-formed but not
    /// recognized.
    async fn validate(&self, token: &str) -> Result<Option<OAuthIdentity>, AuthError>;
}

/// In-memory key store for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryApiKeyStore {
    records: std::sync::RwLock<std::collections::HashMap<String, ApiKeyRecord>>,
}

impl MemoryApiKeyStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record under the hash of `token`.
    pub fn insert_token(&self, token: &str, record: ApiKeyRecord) {
        self.insert_hash(sha256_hex(token.as_bytes()), record);
    }

    /// Insert a record under a precomputed hash (configuration never
    /// carries raw tokens).
    pub fn insert_hash(&self, key_hash: String, record: ApiKeyRecord) {
        self.records
            .write()
            .expect("key store lock poisoned")
            .insert(key_hash, record);
    }
}

#[async_trait]
impl ApiKeyStore for MemoryApiKeyStore {
    async fn get(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, AuthError> {
        Ok(self
            .records
            .read()
            .expect("key store lock poisoned")
            .get(key_hash)
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// A scope requirement attached to matching routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeRule {
    /// Method the rule applies to; `None` matches any method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Path prefix the rule applies to.
    pub path_prefix: String,
    /// Scopes the principal must hold (all of them).
    pub scopes: Vec<String>,
}

/// Resolver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    /// Paths served without authentication. Entries ending in `*` match by
    /// prefix.
    pub public_paths: Vec<String>,
    /// Shared secret for the internal header; disabled when `None`.
    pub internal_secret: Option<String>,
    /// Token prefixes treated as API keys.
    pub key_prefixes: Vec<String>,
    /// Scope requirements per route.
    pub scope_rules: Vec<ScopeRule>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            public_paths: vec!["/".into(), "/health".into()],
            internal_secret: None,
            key_prefixes: DEFAULT_KEY_PREFIXES.iter().map(|s| (*s).into()).collect(),
            scope_rules: vec![],
        }
    }
}

/// Credential material the gateway extracted from request headers, in
/// extraction order: custom header, `X-API-Key`, `Authorization: Bearer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialSource<'a> {
    /// Value of the configured custom credential header.
    pub custom_header: Option<&'a str>,
    /// `X-API-Key` value.
    pub x_api_key: Option<&'a str>,
    /// Full `Authorization` header value.
    pub authorization: Option<&'a str>,
    /// Value of the internal-auth header.
    pub internal_header: Option<&'a str>,
}

impl<'a> CredentialSource<'a> {
    fn token(&self) -> Option<&'a str> {
        if let Some(v) = self.custom_header {
            return Some(v);
        }
        if let Some(v) = self.x_api_key {
            return Some(v);
        }
        self.authorization
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
    }
}

/// The auth resolver.
pub struct AuthResolver {
    config: AuthConfig,
    key_store: Option<Arc<dyn ApiKeyStore>>,
    oauth: Option<Arc<dyn OAuthValidator>>,
}

impl AuthResolver {
    /// Build a resolver over the configured backends.
    #[must_use]
    pub fn new(
        config: AuthConfig,
        key_store: Option<Arc<dyn ApiKeyStore>>,
        oauth: Option<Arc<dyn OAuthValidator>>,
    ) -> Self {
        Self {
            config,
            key_store,
            oauth,
        }
    }

    /// Whether `path` is served without authentication.
    #[must_use]
    pub fn is_public(&self, path: &str) -> bool {
        self.config.public_paths.iter().any(|entry| {
            match entry.strip_suffix('*') {
                Some(prefix) => path.starts_with(prefix),
                None => path == entry,
            }
        })
    }

    /// Resolve the caller for `method`/`path`.
    ///
    /// `Ok(None)` means the path is public and carries no principal.
    pub async fn resolve(
        &self,
        method: &str,
        path: &str,
        credentials: CredentialSource<'_>,
    ) -> Result<Option<Principal>, AuthError> {
        if self.is_public(path) {
            return Ok(None);
        }

        if let Some(secret) = &self.config.internal_secret
            && let Some(presented) = credentials.internal_header
            && secret.as_str() == presented
        {
            return Ok(Some(Principal::internal()));
        }

        let token = credentials.token().ok_or(AuthError::MissingCredential)?;

        let principal = self.authenticate(token).await?;
        self.check_scopes(&principal, method, path)?;
        Ok(Some(principal))
    }

    async fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
        let key_shaped = self
            .config
            .key_prefixes
            .iter()
            .any(|p| token.starts_with(p.as_str()));

        if key_shaped || self.key_store.is_some() {
            let store = self
                .key_store
                .as_ref()
                .ok_or(AuthError::NoBackendConfigured)?;
            return self.authenticate_api_key(store, token).await;
        }

        if let Some(oauth) = &self.oauth {
            let identity = oauth
                .validate(token)
                .await?
                .ok_or(AuthError::InvalidToken)?;
            return Ok(Principal {
                subject: identity.user_id.clone(),
                kind: PrincipalKind::OAuth,
                scopes: identity.scopes,
                key_hash: Some(sha256_hex(token.as_bytes())),
                key_hint: Some(key_hint(token)),
                user_id: Some(identity.user_id),
                email: identity.email,
                org_ids: identity.org_ids,
            });
        }

        // Deny by default; never silent allow.
        Err(AuthError::NoBackendConfigured)
    }

    async fn authenticate_api_key(
        &self,
        store: &Arc<dyn ApiKeyStore>,
        token: &str,
    ) -> Result<Principal, AuthError> {
        let hash = sha256_hex(token.as_bytes());
        let record = store.get(&hash).await?.ok_or(AuthError::UnknownKey)?;

        if !record.active {
            return Err(AuthError::InactiveKey);
        }
        if let Some(expires_at) = record.expires_at
            && expires_at < Utc::now()
        {
            return Err(AuthError::ExpiredKey {
                expired_at: expires_at,
            });
        }

        debug!(key = %key_hint(token), "api key accepted");

        Ok(Principal {
            subject: record
                .owner_id
                .clone()
                .unwrap_or_else(|| format!("key:{}", key_hint(token))),
            kind: PrincipalKind::ApiKey,
            scopes: record.scopes,
            key_hash: Some(hash),
            key_hint: Some(key_hint(token)),
            user_id: record.owner_id,
            email: None,
            org_ids: record.org_ids,
        })
    }

    fn check_scopes(
        &self,
        principal: &Principal,
        method: &str,
        path: &str,
    ) -> Result<(), AuthError> {
        for rule in &self.config.scope_rules {
            let method_matches = rule
                .method
                .as_deref()
                .is_none_or(|m| m.eq_ignore_ascii_case(method));
            if !method_matches || !path.starts_with(&rule.path_prefix) {
                continue;
            }
            if !rule.scopes.iter().all(|s| principal.has_scope(s)) {
                return Err(AuthError::InsufficientScope {
                    required: rule.scopes.clone(),
                });
            }
        }
        Ok(())
    }
}
