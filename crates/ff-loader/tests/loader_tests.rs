// SPDX-License-Identifier: MIT OR Apache-2.0
//! Loader pipeline tests: caching, coalescing, breaker lifecycle, version
//! pinning, rollback, and graceful degradation.

use async_trait::async_trait;
use ff_core::{FunctionKind, FunctionMetadata, GenerativeFunction};
use ff_loader::{
    BreakerConfig, BreakerState, FunctionLoader, LoadErrorKind, LoaderConfig, RetryPolicy,
};
use ff_store::{FunctionRegistry, MemoryCodeStore, MemoryStubCache, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn generative_meta(id: &str, version: &str) -> FunctionMetadata {
    FunctionMetadata {
        id: id.into(),
        version: version.into(),
        kind: FunctionKind::Generative(GenerativeFunction {
            model: None,
            user_prompt: "Echo {{input}}".into(),
            system_prompt: None,
            output_schema: None,
            temperature: None,
            max_tokens: None,
            examples: vec![],
            input_schema: None,
        }),
        name: None,
        description: None,
        tags: vec![],
        owner_id: None,
        org_id: None,
        created_at: None,
        updated_at: None,
    }
}

/// Registry mock with failure injection and call counting.
#[derive(Default)]
struct MockRegistry {
    latest: Mutex<HashMap<String, FunctionMetadata>>,
    versions: Mutex<HashMap<(String, String), FunctionMetadata>>,
    fail_next: AtomicUsize,
    fail_always: AtomicBool,
    fail_message: Mutex<String>,
    delay_ms: u64,
    no_version_support: bool,
    latest_calls: AtomicUsize,
}

impl MockRegistry {
    fn with_function(meta: FunctionMetadata) -> Self {
        let reg = Self::default();
        reg.publish(meta);
        reg
    }

    fn publish(&self, meta: FunctionMetadata) {
        self.versions
            .lock()
            .unwrap()
            .insert((meta.id.clone(), meta.version.clone()), meta.clone());
        self.latest.lock().unwrap().insert(meta.id.clone(), meta);
    }

    fn fail_next(&self, count: usize, message: &str) {
        self.fail_next.store(count, Relaxed);
        *self.fail_message.lock().unwrap() = message.to_string();
    }

    fn fail_always(&self, message: &str) {
        self.fail_always.store(true, Relaxed);
        *self.fail_message.lock().unwrap() = message.to_string();
    }

    fn heal(&self) {
        self.fail_always.store(false, Relaxed);
        self.fail_next.store(0, Relaxed);
    }

    fn latest_calls(&self) -> usize {
        self.latest_calls.load(Relaxed)
    }

    fn maybe_fail(&self) -> Result<(), StoreError> {
        if self.fail_always.load(Relaxed) {
            return Err(StoreError::Backend {
                message: self.fail_message.lock().unwrap().clone(),
            });
        }
        let remaining = self.fail_next.load(Relaxed);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Relaxed);
            return Err(StoreError::Backend {
                message: self.fail_message.lock().unwrap().clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FunctionRegistry for MockRegistry {
    async fn get_latest(&self, id: &str) -> Result<Option<FunctionMetadata>, StoreError> {
        self.latest_calls.fetch_add(1, Relaxed);
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        self.maybe_fail()?;
        Ok(self.latest.lock().unwrap().get(id).cloned())
    }

    async fn get_version(
        &self,
        id: &str,
        version: &str,
    ) -> Result<Option<FunctionMetadata>, StoreError> {
        Ok(self
            .versions
            .lock()
            .unwrap()
            .get(&(id.to_string(), version.to_string()))
            .cloned())
    }

    fn supports_versions(&self) -> bool {
        !self.no_version_support
    }

    async fn put(&self, metadata: &FunctionMetadata) -> Result<(), StoreError> {
        self.publish(metadata.clone());
        Ok(())
    }

    async fn replace(&self, metadata: &FunctionMetadata) -> Result<(), StoreError> {
        self.publish(metadata.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.latest.lock().unwrap().remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<FunctionMetadata>, StoreError> {
        Ok(self.latest.lock().unwrap().values().cloned().collect())
    }
}

fn loader_with(registry: Arc<MockRegistry>, config: LoaderConfig) -> FunctionLoader {
    FunctionLoader::new(
        registry,
        Arc::new(MemoryCodeStore::new()),
        Arc::new(MemoryStubCache::new()),
        config,
    )
}

fn no_retry_config() -> LoaderConfig {
    LoaderConfig {
        retry: RetryPolicy {
            max_retries: 0,
            jitter: false,
            initial_delay_ms: 1,
            ..Default::default()
        },
        breaker: BreakerConfig {
            failure_threshold: 3,
            success_threshold: 1,
            reset_timeout_ms: 50,
            max_half_open_requests: 1,
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn second_load_hits_the_cache() {
    let registry = Arc::new(MockRegistry::with_function(generative_meta("echo", "1.0.0")));
    let loader = loader_with(Arc::clone(&registry), LoaderConfig::default());

    let first = loader.load("echo").await.unwrap();
    assert!(!first.from_cache);

    let second = loader.load("echo").await.unwrap();
    assert!(second.from_cache);
    assert_eq!(second.stub.version, "1.0.0");
    assert_eq!(registry.latest_calls(), 1);

    let metrics = loader.metrics();
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.cache_misses, 1);
    assert_eq!(metrics.successes, 1);
}

#[tokio::test]
async fn breaker_opens_fails_fast_and_self_heals() {
    let registry = Arc::new(MockRegistry::with_function(generative_meta("echo", "1.0.0")));
    registry.fail_next(3, "connection refused");
    let loader = loader_with(Arc::clone(&registry), no_retry_config());

    // Three loads hit the registry and fail.
    for _ in 0..3 {
        let err = loader.load("echo").await.unwrap_err();
        assert_eq!(err.kind, LoadErrorKind::Upstream);
    }
    assert_eq!(registry.latest_calls(), 3);
    assert_eq!(loader.breaker_state("echo"), BreakerState::Open);

    // The fourth fails fast without touching the registry.
    let err = loader.load("echo").await.unwrap_err();
    assert_eq!(err.kind, LoadErrorKind::BreakerOpen);
    assert_eq!(err.breaker_state, BreakerState::Open);
    assert_eq!(registry.latest_calls(), 3);

    // Past the cooldown a probe goes through and closes the breaker.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let loaded = loader.load("echo").await.unwrap();
    assert!(!loaded.from_cache);
    assert_eq!(registry.latest_calls(), 4);
    assert_eq!(loader.breaker_state("echo"), BreakerState::Closed);
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let registry = Arc::new(MockRegistry::default());
    let loader = loader_with(
        Arc::clone(&registry),
        LoaderConfig {
            retry: RetryPolicy {
                max_retries: 3,
                initial_delay_ms: 1,
                jitter: false,
                ..Default::default()
            },
            ..Default::default()
        },
    );

    let err = loader.load("ghost").await.unwrap_err();
    assert_eq!(err.kind, LoadErrorKind::NotFound);
    assert_eq!(err.retry_count, 0);
    assert_eq!(registry.latest_calls(), 1);
}

#[tokio::test]
async fn non_transient_message_is_not_retried() {
    let registry = Arc::new(MockRegistry::with_function(generative_meta("echo", "1.0.0")));
    registry.fail_always("invalid metadata row");
    let loader = loader_with(
        Arc::clone(&registry),
        LoaderConfig {
            retry: RetryPolicy {
                max_retries: 3,
                initial_delay_ms: 1,
                jitter: false,
                ..Default::default()
            },
            ..Default::default()
        },
    );

    let err = loader.load("echo").await.unwrap_err();
    assert_eq!(err.retry_count, 0);
    assert_eq!(registry.latest_calls(), 1);
}

#[tokio::test]
async fn transient_failures_retry_until_success() {
    let registry = Arc::new(MockRegistry::with_function(generative_meta("echo", "1.0.0")));
    registry.fail_next(2, "connection reset by peer");
    let loader = loader_with(
        Arc::clone(&registry),
        LoaderConfig {
            retry: RetryPolicy {
                max_retries: 3,
                initial_delay_ms: 1,
                jitter: false,
                ..Default::default()
            },
            ..Default::default()
        },
    );

    let loaded = loader.load("echo").await.unwrap();
    assert_eq!(loaded.retry_count, 2);
    assert_eq!(registry.latest_calls(), 3);
    assert_eq!(loader.metrics().retries, 2);
}

#[tokio::test]
async fn concurrent_loads_coalesce_onto_one_registry_call() {
    let registry = Arc::new(MockRegistry {
        delay_ms: 30,
        ..Default::default()
    });
    registry.publish(generative_meta("echo", "1.0.0"));
    let loader = Arc::new(loader_with(Arc::clone(&registry), LoaderConfig::default()));

    let (a, b) = tokio::join!(loader.load("echo"), loader.load("echo"));
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(registry.latest_calls(), 1);
}

#[tokio::test]
async fn coalesced_waiters_are_flagged_on_failure() {
    let registry = Arc::new(MockRegistry {
        delay_ms: 30,
        ..Default::default()
    });
    registry.publish(generative_meta("echo", "1.0.0"));
    registry.fail_always("connection refused");
    let loader = Arc::new(loader_with(Arc::clone(&registry), no_retry_config()));

    let (a, b) = tokio::join!(loader.load("echo"), loader.load("echo"));
    let (a, b) = (a.unwrap_err(), b.unwrap_err());
    assert_eq!(registry.latest_calls(), 1);
    // Exactly one caller joined the other's attempt.
    assert_ne!(a.is_coalesced_request, b.is_coalesced_request);
    // Both carry the original cause.
    assert!(a.message.contains("connection refused"));
    assert!(b.message.contains("connection refused"));
}

#[tokio::test]
async fn version_override_when_registry_lacks_versions() {
    let registry = Arc::new(MockRegistry {
        no_version_support: true,
        ..Default::default()
    });
    registry.publish(generative_meta("echo", "2.0.0"));
    let loader = loader_with(Arc::clone(&registry), LoaderConfig::default());

    let loaded = loader.load_version("echo", "1.0.0").await.unwrap();
    assert_eq!(loaded.stub.version, "1.0.0");
    assert_eq!(loaded.stub.metadata.version, "1.0.0");
}

#[tokio::test]
async fn rollback_republishes_the_pinned_version_as_latest() {
    let registry = Arc::new(MockRegistry::default());
    registry.publish(generative_meta("echo", "1.0.0"));
    registry.publish(generative_meta("echo", "2.0.0"));
    let loader = loader_with(Arc::clone(&registry), LoaderConfig::default());

    assert_eq!(loader.load("echo").await.unwrap().stub.version, "2.0.0");

    let rolled = loader.rollback("echo", "1.0.0").await.unwrap();
    assert_eq!(rolled.stub.version, "1.0.0");

    // Latest now serves the rolled-back version, straight from cache.
    let after = loader.load("echo").await.unwrap();
    assert!(after.from_cache);
    assert_eq!(after.stub.version, "1.0.0");
    assert_eq!(loader.metrics().rollbacks, 1);
}

#[tokio::test]
async fn degraded_load_serves_fallback_version() {
    let registry = Arc::new(MockRegistry::default());
    registry.publish(generative_meta("echo", "1.0.0"));
    registry.fail_always("connection reset");
    let loader = loader_with(
        Arc::clone(&registry),
        LoaderConfig {
            retry: RetryPolicy {
                max_retries: 1,
                initial_delay_ms: 1,
                jitter: false,
                ..Default::default()
            },
            graceful_degradation: true,
            fallback_version: Some("1.0.0".into()),
            ..Default::default()
        },
    );

    let loaded = loader.load("echo").await.unwrap();
    assert!(loaded.degraded);
    assert_eq!(loaded.stub.version, "1.0.0");
    assert!(
        loaded
            .degradation_reason
            .as_deref()
            .unwrap()
            .contains("connection reset")
    );
}

#[tokio::test]
async fn health_reflects_store_reachability() {
    let registry = Arc::new(MockRegistry::with_function(generative_meta("echo", "1.0.0")));
    let loader = loader_with(Arc::clone(&registry), LoaderConfig::default());

    let report = loader.health_check().await;
    assert_eq!(report.status, ff_loader::HealthStatus::Healthy);

    registry.fail_always("registry offline");
    let report = loader.health_check().await;
    assert_eq!(report.status, ff_loader::HealthStatus::Degraded);
    assert!(!report.registry_ok);
    assert!(report.code_store_ok);
}

#[tokio::test]
async fn cache_consistency_hit_implies_prior_success() {
    // A cache hit can only follow a successful load of the same pair: a
    // cold loader with a failing registry never reports from_cache.
    let registry = Arc::new(MockRegistry::default());
    registry.fail_always("connection refused");
    let loader = loader_with(Arc::clone(&registry), no_retry_config());

    assert!(loader.load("echo").await.is_err());
    registry.heal();
    registry.publish(generative_meta("echo", "1.0.0"));

    let first_success = loader.load("echo").await.unwrap();
    assert!(!first_success.from_cache);
    let hit = loader.load("echo").await.unwrap();
    assert!(hit.from_cache);
}
