// SPDX-License-Identifier: MIT OR Apache-2.0
//! Gateway configuration: TOML file, semantic validation with accumulated
//! errors, and conversion into the runtime components' own configs.

use ff_auth::{ApiKeyRecord, AuthConfig};
use ff_limit::RateLimitPolicy;
use ff_loader::{BreakerConfig, LoaderConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors from configuration loading or validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Parser detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual failure messages.
        reasons: Vec<String>,
    },
}

/// A pre-provisioned API key, stored by hash; raw tokens never appear in
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeededApiKey {
    /// `SHA-256(token)` hex.
    pub key_hash: String,
    /// The key record.
    #[serde(flatten)]
    pub record: ApiKeyRecord,
}

/// Auth section: the resolver config plus gateway-side header names and
/// seeded keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSection {
    /// Resolver configuration.
    #[serde(flatten)]
    pub resolver: AuthConfig,
    /// Name of an extra credential header checked before `X-API-Key`.
    pub custom_credential_header: Option<String>,
    /// Name of the internal-auth header.
    pub internal_header_name: Option<String>,
    /// Keys provisioned at startup.
    pub api_keys: Vec<SeededApiKey>,
}

/// Loader section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoaderSection {
    /// Stub-cache TTL, seconds.
    pub cache_ttl_secs: u64,
    /// Retry policy.
    pub retry: RetryPolicy,
    /// Breaker tuning.
    pub breaker: BreakerConfig,
    /// Serve a fallback version when loads exhaust retries.
    pub graceful_degradation: bool,
    /// The fallback version.
    pub fallback_version: Option<String>,
}

impl Default for LoaderSection {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3_600,
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            graceful_degradation: false,
            fallback_version: None,
        }
    }
}

impl LoaderSection {
    /// Convert into the loader's own config.
    #[must_use]
    pub fn to_loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            retry: self.retry.clone(),
            breaker: self.breaker.clone(),
            graceful_degradation: self.graceful_degradation,
            fallback_version: self.fallback_version.clone(),
        }
    }
}

/// Dedup section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DedupSection {
    /// Whether invoke-path dedup is on.
    pub enabled: bool,
    /// Entry TTL, milliseconds.
    pub ttl_ms: u64,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 30_000,
        }
    }
}

/// CORS section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CorsSection {
    /// Origins allowed to call the API; empty disables the CORS layer.
    pub allowed_origins: Vec<String>,
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Bind address.
    pub bind: String,
    /// Service name reported by `/health` and audit events.
    pub service_name: String,
    /// Auth section.
    pub auth: AuthSection,
    /// Rate-limit policy.
    pub rate_limit: RateLimitPolicy,
    /// Loader section.
    pub loader: LoaderSection,
    /// Dedup section.
    pub dedup: DedupSection,
    /// CORS section.
    pub cors: CorsSection,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
            service_name: ff_core::SERVICE_NAME.into(),
            auth: AuthSection::default(),
            rate_limit: RateLimitPolicy::default(),
            loader: LoaderSection::default(),
            dedup: DedupSection::default(),
            cors: CorsSection::default(),
        }
    }
}

impl GatewayConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation, accumulating every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();

        if self.bind.parse::<std::net::SocketAddr>().is_err() {
            reasons.push(format!("bind address '{}' is not host:port", self.bind));
        }
        if self.service_name.trim().is_empty() {
            reasons.push("serviceName must not be empty".into());
        }
        if self.loader.cache_ttl_secs == 0 {
            reasons.push("loader.cacheTtlSecs must be positive".into());
        }
        if self.dedup.ttl_ms == 0 {
            reasons.push("dedup.ttlMs must be positive".into());
        }
        if let Some(fallback) = &self.loader.fallback_version
            && ff_core::validate::validate_version(fallback).is_err()
        {
            reasons.push(format!(
                "loader.fallbackVersion '{fallback}' is not semver"
            ));
        }
        for (section, config) in [
            ("rateLimit.ip", &self.rate_limit.ip),
            ("rateLimit.function", &self.rate_limit.function),
            ("rateLimit.endpoint", &self.rate_limit.endpoint),
            ("rateLimit.custom", &self.rate_limit.custom),
        ] {
            if let Some(limit) = config {
                if limit.window_ms == 0 {
                    reasons.push(format!("{section}.windowMs must be positive"));
                }
                if limit.max_requests == 0 {
                    reasons.push(format!("{section}.maxRequests must be positive"));
                }
            }
        }
        for key in &self.auth.api_keys {
            if key.key_hash.len() != 64 || !key.key_hash.bytes().all(|b| b.is_ascii_hexdigit()) {
                reasons.push("auth.apiKeys entries must use 64-char hex keyHash values".into());
            }
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError { reasons })
        }
    }
}
