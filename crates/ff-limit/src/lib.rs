// SPDX-License-Identifier: MIT OR Apache-2.0
//! ff-limit
//!
//! Sliding-window rate limiting. Keys are organized into categories
//! (endpoint, custom, function, ip), each with its own `(window, max)`
//! configuration; evaluation per request runs endpoint → custom → function
//! → ip and the first denial wins. Limiter instances are held in a bounded
//! LRU (cap 10,000) and empty window buckets are swept at most every five
//! minutes of traffic.
//!
//! All state is per instance. Promoting limits to a durable store keeps
//! this contract; both token-bucket and sliding-window semantics satisfy
//! the decision shape below.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Cap on distinct limiter instances.
pub const MAX_LIMITER_INSTANCES: usize = 10_000;

/// Minimum interval between empty-bucket sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Window configuration for one limiter category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitConfig {
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Requests admitted per key per window.
    pub max_requests: u32,
}

impl LimitConfig {
    /// Window as a [`Duration`].
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Limiter key categories, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitCategory {
    /// Per `method:path`.
    Endpoint,
    /// Caller-supplied key.
    Custom,
    /// Per function id.
    Function,
    /// Per client address.
    Ip,
}

impl LimitCategory {
    /// Wire label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Endpoint => "endpoint",
            Self::Custom => "custom",
            Self::Function => "function",
            Self::Ip => "ip",
        }
    }
}

impl fmt::Display for LimitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-category policy plus bypass rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitPolicy {
    /// Per-ip limits.
    #[serde(default)]
    pub ip: Option<LimitConfig>,
    /// Per-function limits.
    #[serde(default)]
    pub function: Option<LimitConfig>,
    /// Per-endpoint limits.
    #[serde(default)]
    pub endpoint: Option<LimitConfig>,
    /// Limits for caller-supplied custom keys.
    #[serde(default)]
    pub custom: Option<LimitConfig>,
    /// Paths that skip limiting entirely.
    #[serde(default)]
    pub bypass_paths: Vec<String>,
    /// Client addresses that skip limiting entirely.
    #[serde(default)]
    pub whitelist_ips: Vec<String>,
}

impl RateLimitPolicy {
    fn config_for(&self, category: LimitCategory) -> Option<LimitConfig> {
        match category {
            LimitCategory::Endpoint => self.endpoint,
            LimitCategory::Custom => self.custom,
            LimitCategory::Function => self.function,
            LimitCategory::Ip => self.ip,
        }
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Outcome of one admission check against one limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request was admitted.
    pub allowed: bool,
    /// Configured per-window cap.
    pub limit: u32,
    /// Requests remaining in the current window.
    pub remaining: u32,
    /// Time until the window resets.
    pub reset_after: Duration,
}

impl RateLimitDecision {
    /// `Retry-After` seconds: `ceil(reset / 1s)`.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        self.reset_after.as_millis().div_ceil(1000) as u64
    }

    /// Window reset as a unix timestamp (seconds), for
    /// `X-RateLimit-Reset`.
    #[must_use]
    pub fn reset_at_unix(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        (now + self.reset_after).as_secs()
    }
}

/// Aggregate outcome across the evaluated categories.
#[derive(Debug, Clone)]
pub enum RateLimitOutcome {
    /// No limiting applied (disabled, bypass path, whitelisted ip, or no
    /// category configured).
    Bypassed,
    /// Admitted. The decision carries the tightest remaining budget across
    /// the evaluated categories, for the `X-RateLimit-*` headers.
    Allowed(RateLimitDecision),
    /// Denied by the named category.
    Denied {
        /// Category that denied.
        category: LimitCategory,
        /// The denying decision (for `Retry-After` and headers).
        decision: RateLimitDecision,
    },
}

/// Attributes of the request under admission.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRequest<'a> {
    /// Client address.
    pub ip: &'a str,
    /// HTTP method.
    pub method: &'a str,
    /// Request path.
    pub path: &'a str,
    /// Target function, when the route names one.
    pub function_id: Option<&'a str>,
    /// Caller-supplied custom key.
    pub custom_key: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// Sliding-window limiter
// ---------------------------------------------------------------------------

/// Sliding-window counter over per-key timestamp buckets.
pub struct SlidingWindowLimiter {
    window: Duration,
    max_requests: u32,
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    /// New limiter admitting `max_requests` per `window` per key.
    #[must_use]
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Check-and-increment for `key`.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("limiter mutex poisoned");
        let bucket = buckets.entry(key.to_string()).or_default();

        // Expire timestamps that slid out of the window.
        while let Some(&front) = bucket.front() {
            if now.duration_since(front) >= self.window {
                bucket.pop_front();
            } else {
                break;
            }
        }

        let reset_after = |bucket: &VecDeque<Instant>| {
            bucket
                .front()
                .map(|&front| (front + self.window).saturating_duration_since(now))
                .unwrap_or(self.window)
        };

        if bucket.len() as u32 >= self.max_requests {
            return RateLimitDecision {
                allowed: false,
                limit: self.max_requests,
                remaining: 0,
                reset_after: reset_after(bucket),
            };
        }

        bucket.push_back(now);
        RateLimitDecision {
            allowed: true,
            limit: self.max_requests,
            remaining: self.max_requests - bucket.len() as u32,
            reset_after: reset_after(bucket),
        }
    }

    /// Drop keys whose buckets are empty after expiry.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("limiter mutex poisoned");
        buckets.retain(|_, bucket| {
            while let Some(&front) = bucket.front() {
                if now.duration_since(front) >= self.window {
                    bucket.pop_front();
                } else {
                    break;
                }
            }
            !bucket.is_empty()
        });
    }

    /// Number of tracked keys (post-sweep count is what matters).
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().expect("limiter mutex poisoned").len()
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Rate-limit façade evaluated per request.
///
/// Limiter instances are keyed by `(category, window, max)` and held in a
/// bounded LRU; the least-recently-used instance is evicted on overflow.
pub struct RateLimitService {
    policy: RateLimitPolicy,
    instances: Mutex<LruCache<String, Arc<SlidingWindowLimiter>>>,
    last_sweep: Mutex<Instant>,
}

impl RateLimitService {
    /// Service with the default instance cap.
    #[must_use]
    pub fn new(policy: RateLimitPolicy) -> Self {
        // MAX_LIMITER_INSTANCES is nonzero by construction.
        let cap = NonZeroUsize::new(MAX_LIMITER_INSTANCES).expect("nonzero cap");
        Self::with_capacity(policy, cap)
    }

    /// Service with an explicit instance cap (tests exercise eviction with
    /// tiny caps).
    #[must_use]
    pub fn with_capacity(policy: RateLimitPolicy, capacity: NonZeroUsize) -> Self {
        Self {
            policy,
            instances: Mutex::new(LruCache::new(capacity)),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Evaluate the request: endpoint → custom → function → ip, first
    /// denial wins.
    pub fn check(&self, request: &RateLimitRequest<'_>) -> RateLimitOutcome {
        if self
            .policy
            .bypass_paths
            .iter()
            .any(|p| p == request.path)
        {
            return RateLimitOutcome::Bypassed;
        }
        if self.policy.whitelist_ips.iter().any(|ip| ip == request.ip) {
            return RateLimitOutcome::Bypassed;
        }

        self.maybe_sweep();

        let endpoint_key = format!("{}:{}", request.method, request.path);
        let evaluations: [(LimitCategory, Option<&str>); 4] = [
            (LimitCategory::Endpoint, Some(endpoint_key.as_str())),
            (LimitCategory::Custom, request.custom_key),
            (LimitCategory::Function, request.function_id),
            (LimitCategory::Ip, Some(request.ip)),
        ];

        let mut tightest: Option<RateLimitDecision> = None;
        for (category, key) in evaluations {
            let (Some(config), Some(key)) = (self.policy.config_for(category), key) else {
                continue;
            };
            let limiter = self.limiter_for(category, config);
            let decision = limiter.check(key);
            if !decision.allowed {
                debug!(
                    category = %category,
                    key,
                    limit = decision.limit,
                    "rate limit denied"
                );
                return RateLimitOutcome::Denied { category, decision };
            }
            if tightest.is_none_or(|t| decision.remaining < t.remaining) {
                tightest = Some(decision);
            }
        }

        match tightest {
            Some(decision) => RateLimitOutcome::Allowed(decision),
            None => RateLimitOutcome::Bypassed,
        }
    }

    /// Number of live limiter instances.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances.lock().expect("instance mutex poisoned").len()
    }

    fn limiter_for(&self, category: LimitCategory, config: LimitConfig) -> Arc<SlidingWindowLimiter> {
        let key = format!("{}:{}:{}", category, config.window_ms, config.max_requests);
        let mut instances = self.instances.lock().expect("instance mutex poisoned");
        if let Some(limiter) = instances.get(&key) {
            return Arc::clone(limiter);
        }
        let limiter = Arc::new(SlidingWindowLimiter::new(
            config.window(),
            config.max_requests,
        ));
        instances.put(key, Arc::clone(&limiter));
        limiter
    }

    fn maybe_sweep(&self) {
        let mut last = self.last_sweep.lock().expect("sweep mutex poisoned");
        if last.elapsed() < SWEEP_INTERVAL {
            return;
        }
        *last = Instant::now();
        drop(last);

        let instances = self.instances.lock().expect("instance mutex poisoned");
        for (_, limiter) in instances.iter() {
            limiter.sweep();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(ip: &'a str, path: &'a str) -> RateLimitRequest<'a> {
        RateLimitRequest {
            ip,
            method: "POST",
            path,
            function_id: Some("sum"),
            custom_key: None,
        }
    }

    #[test]
    fn admits_up_to_max_then_denies() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60), 2);
        assert!(limiter.check("ip-1").allowed);
        assert!(limiter.check("ip-1").allowed);

        let third = limiter.check("ip-1");
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
        assert!(third.retry_after_secs() >= 1);
        assert!(third.retry_after_secs() <= 60);

        // Other keys are unaffected.
        assert!(limiter.check("ip-2").allowed);
    }

    #[test]
    fn window_expiry_frees_budget() {
        let limiter = SlidingWindowLimiter::new(Duration::from_millis(30), 1);
        assert!(limiter.check("k").allowed);
        assert!(!limiter.check("k").allowed);
        std::thread::sleep(Duration::from_millis(40));
        assert!(limiter.check("k").allowed);
    }

    #[test]
    fn remaining_counts_down() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60), 3);
        assert_eq!(limiter.check("k").remaining, 2);
        assert_eq!(limiter.check("k").remaining, 1);
        assert_eq!(limiter.check("k").remaining, 0);
        assert!(!limiter.check("k").allowed);
    }

    #[test]
    fn endpoint_denial_wins_over_ip() {
        let service = RateLimitService::new(RateLimitPolicy {
            endpoint: Some(LimitConfig {
                window_ms: 60_000,
                max_requests: 1,
            }),
            ip: Some(LimitConfig {
                window_ms: 60_000,
                max_requests: 100,
            }),
            ..Default::default()
        });

        let req = request("10.0.0.1", "/v1/functions/sum");
        assert!(matches!(service.check(&req), RateLimitOutcome::Allowed(_)));
        match service.check(&req) {
            RateLimitOutcome::Denied { category, .. } => {
                assert_eq!(category, LimitCategory::Endpoint);
            }
            other => panic!("expected endpoint denial, got {other:?}"),
        }
    }

    #[test]
    fn bypass_paths_and_whitelist_skip_limiting() {
        let service = RateLimitService::new(RateLimitPolicy {
            ip: Some(LimitConfig {
                window_ms: 60_000,
                max_requests: 1,
            }),
            bypass_paths: vec!["/health".into()],
            whitelist_ips: vec!["10.9.9.9".into()],
            ..Default::default()
        });

        for _ in 0..5 {
            assert!(matches!(
                service.check(&request("1.2.3.4", "/health")),
                RateLimitOutcome::Bypassed
            ));
            assert!(matches!(
                service.check(&request("10.9.9.9", "/v1/functions/sum")),
                RateLimitOutcome::Bypassed
            ));
        }
    }

    #[test]
    fn ip_category_scenario_two_then_429() {
        let service = RateLimitService::new(RateLimitPolicy {
            ip: Some(LimitConfig {
                window_ms: 60_000,
                max_requests: 2,
            }),
            ..Default::default()
        });

        let req = request("203.0.113.7", "/v1/functions/sum");
        assert!(matches!(service.check(&req), RateLimitOutcome::Allowed(_)));
        assert!(matches!(service.check(&req), RateLimitOutcome::Allowed(_)));
        match service.check(&req) {
            RateLimitOutcome::Denied { category, decision } => {
                assert_eq!(category, LimitCategory::Ip);
                let expected = decision.reset_after.as_millis().div_ceil(1000) as u64;
                assert_eq!(decision.retry_after_secs(), expected);
            }
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn instance_table_is_lru_bounded() {
        let service = RateLimitService::with_capacity(
            RateLimitPolicy {
                ip: Some(LimitConfig {
                    window_ms: 60_000,
                    max_requests: 10,
                }),
                endpoint: Some(LimitConfig {
                    window_ms: 1_000,
                    max_requests: 10,
                }),
                function: Some(LimitConfig {
                    window_ms: 2_000,
                    max_requests: 10,
                }),
                ..Default::default()
            },
            NonZeroUsize::new(2).expect("nonzero"),
        );

        service.check(&request("1.1.1.1", "/v1/functions/sum"));
        // Three categories were evaluated but only two instances fit.
        assert_eq!(service.instance_count(), 2);
    }

    #[test]
    fn sweep_purges_empty_buckets() {
        let limiter = SlidingWindowLimiter::new(Duration::from_millis(10), 5);
        limiter.check("a");
        limiter.check("b");
        assert_eq!(limiter.tracked_keys(), 2);

        std::thread::sleep(Duration::from_millis(20));
        limiter.sweep();
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn no_configured_categories_bypasses() {
        let service = RateLimitService::new(RateLimitPolicy::default());
        assert!(matches!(
            service.check(&request("1.1.1.1", "/v1/functions/sum")),
            RateLimitOutcome::Bypassed
        ));
    }
}
