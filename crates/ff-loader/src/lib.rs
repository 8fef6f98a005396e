// SPDX-License-Identifier: MIT OR Apache-2.0
//! ff-loader
//!
//! Loads runnable stubs on demand: shared stub cache first, then a guarded
//! load pipeline; per-id circuit breaker, local request coalescing, retry
//! with exponential backoff, write-through caching, optional graceful
//! degradation to a fallback version; plus version pinning, rollback,
//! metrics, and a registry/code-store health probe.
//!
//! The in-flight map and breaker table are per instance; cross-instance
//! sharing happens only through the stub cache.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Per-function circuit breakers.
pub mod breaker;
/// Loader metrics and the load-time ring.
pub mod metrics;
/// Retry policy and transient-failure classification.
pub mod retry;

use breaker::{Admission, BreakerTable, CircuitBreaker};
use ff_core::{ErrorKind, FunctionKind, FunctionStub};
use ff_store::{CodeStore, FunctionRegistry, StubCache, keys};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub use breaker::{BreakerConfig, BreakerSnapshot, BreakerState};
pub use metrics::{LoaderMetrics, MetricsSnapshot};
pub use retry::{RetryPolicy, is_transient};

/// Default stub-cache TTL (uniform across functions).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Sentinel id used by the health probe.
const HEALTH_SENTINEL: &str = "__health-probe__";

// ---------------------------------------------------------------------------
// Configuration and results
// ---------------------------------------------------------------------------

/// Loader tuning.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Stub-cache TTL.
    pub cache_ttl: Duration,
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
    /// Circuit-breaker tuning.
    pub breaker: BreakerConfig,
    /// Attempt `fallback_version` when a load exhausts its retries.
    pub graceful_degradation: bool,
    /// Version used for degraded loads.
    pub fallback_version: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            graceful_degradation: false,
            fallback_version: None,
        }
    }
}

/// Failure classification carried on [`FunctionLoadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorKind {
    /// Function or code missing; never retried.
    NotFound,
    /// Fail-fast because the breaker is open (or probe-saturated).
    BreakerOpen,
    /// Registry/code-store failure.
    Upstream,
    /// Stored data failed the parse-then-validate gate.
    Corrupt,
}

impl LoadErrorKind {
    /// Taxonomy kind for the HTTP envelope.
    #[must_use]
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::BreakerOpen | Self::Upstream => ErrorKind::ServiceUnavailable,
            Self::Corrupt => ErrorKind::Internal,
        }
    }
}

/// A failed load, with enough context for downstream logging to attribute
/// the failure to the original attempt.
#[derive(Debug, Clone, Error)]
#[error("failed to load '{function_id}': {message} (retries={retry_count}, breaker={breaker_state})")]
pub struct FunctionLoadError {
    /// Function that failed to load.
    pub function_id: String,
    /// Failure classification.
    pub kind: LoadErrorKind,
    /// Original cause message.
    pub message: String,
    /// Retries consumed by the original attempt.
    pub retry_count: u32,
    /// Breaker state at failure time.
    pub breaker_state: BreakerState,
    /// Set for callers that joined a peer's in-flight attempt.
    pub is_coalesced_request: bool,
}

/// A successful load.
#[derive(Debug, Clone)]
pub struct LoadedStub {
    /// The runnable stub.
    pub stub: FunctionStub,
    /// Served from the shared cache.
    pub from_cache: bool,
    /// Wall time of the load, milliseconds (0 for cache hits).
    pub load_time_ms: u64,
    /// Retries consumed.
    pub retry_count: u32,
    /// A fallback version was served after the primary failed.
    pub degraded: bool,
    /// Why the load degraded.
    pub degradation_reason: Option<String>,
}

type LoadOutcome = Result<LoadedStub, FunctionLoadError>;

struct LoadCause {
    kind: LoadErrorKind,
    message: String,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Aggregate loader health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Both stores reachable, breakers mostly closed.
    Healthy,
    /// One store down, or more than half the breakers open.
    Degraded,
    /// Registry and code store both down.
    Unhealthy,
}

/// Health probe detail.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Aggregate status.
    pub status: HealthStatus,
    /// Registry probe succeeded.
    pub registry_ok: bool,
    /// Code-store probe succeeded.
    pub code_store_ok: bool,
    /// Breakers currently open.
    pub open_breakers: usize,
    /// Breakers tracked.
    pub total_breakers: usize,
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

type InFlightMap = HashMap<String, watch::Receiver<Option<LoadOutcome>>>;

/// The function loader.
pub struct FunctionLoader {
    registry: Arc<dyn FunctionRegistry>,
    code_store: Arc<dyn CodeStore>,
    cache: Arc<dyn StubCache>,
    config: LoaderConfig,
    breakers: BreakerTable,
    in_flight: Arc<StdMutex<InFlightMap>>,
    metrics: LoaderMetrics,
}

/// Removes the in-flight entry when the leader settles or is cancelled, so
/// an abandoned load never traps future callers.
struct FlightGuard {
    map: Arc<StdMutex<InFlightMap>>,
    key: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.map
            .lock()
            .expect("in-flight map poisoned")
            .remove(&self.key);
    }
}

impl FunctionLoader {
    /// Build a loader over the injected stores.
    #[must_use]
    pub fn new(
        registry: Arc<dyn FunctionRegistry>,
        code_store: Arc<dyn CodeStore>,
        cache: Arc<dyn StubCache>,
        config: LoaderConfig,
    ) -> Self {
        let breakers = BreakerTable::new(config.breaker.clone());
        Self {
            registry,
            code_store,
            cache,
            config,
            breakers,
            in_flight: Arc::new(StdMutex::new(HashMap::new())),
            metrics: LoaderMetrics::new(),
        }
    }

    /// Load the latest version of `id`.
    pub async fn load(&self, id: &str) -> LoadOutcome {
        self.load_inner(id, None).await
    }

    /// Load a pinned version of `id`.
    pub async fn load_version(&self, id: &str, version: &str) -> LoadOutcome {
        self.load_inner(id, Some(version)).await
    }

    /// Roll `id` back to `version`: invalidate the latest pointer, reset
    /// the breaker, load the pinned version, and republish it as latest.
    pub async fn rollback(&self, id: &str, version: &str) -> LoadOutcome {
        let latest_key = keys::stub_cache_key(id, None);
        if let Err(e) = self.cache.delete(&latest_key).await {
            warn!(id, error = %e, "failed to invalidate latest stub during rollback");
        }
        self.breakers.reset(id);

        let loaded = self.load_version(id, version).await?;
        if let Err(e) = self
            .cache
            .put(&latest_key, &loaded.stub, self.config.cache_ttl)
            .await
        {
            warn!(id, error = %e, "failed to republish rollback stub as latest");
        }

        self.metrics
            .rollbacks
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        info!(id, version, "rolled back");
        Ok(loaded)
    }

    /// Drop the cached latest stub and breaker state for `id` (after a
    /// delete). Version-pinned cache entries age out by TTL.
    pub async fn invalidate(&self, id: &str) {
        let latest_key = keys::stub_cache_key(id, None);
        if let Err(e) = self.cache.delete(&latest_key).await {
            warn!(id, error = %e, "failed to invalidate cached stub");
        }
        self.breakers.reset(id);
    }

    /// Feed an execution failure (e.g. a tier-budget timeout) into the
    /// function's breaker.
    pub fn note_execution_failure(&self, id: &str) {
        self.breakers.for_id(id).on_failure(false);
    }

    /// Breaker state for `id` (creates the breaker if absent).
    #[must_use]
    pub fn breaker_state(&self, id: &str) -> BreakerState {
        self.breakers.for_id(id).state()
    }

    /// Metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Probe the registry and code store with a sentinel id.
    pub async fn health_check(&self) -> HealthReport {
        let registry_ok = self.registry.get_latest(HEALTH_SENTINEL).await.is_ok();
        let code_store_ok = self.code_store.get(HEALTH_SENTINEL, None).await.is_ok();
        let (_, open, _) = self.breakers.state_counts();
        let total = self.breakers.len();

        let status = if !registry_ok && !code_store_ok {
            HealthStatus::Unhealthy
        } else if !registry_ok || !code_store_ok || (total > 0 && open * 2 > total) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            registry_ok,
            code_store_ok,
            open_breakers: open,
            total_breakers: total,
        }
    }

    // -- load pipeline ----------------------------------------------------

    async fn load_inner(&self, id: &str, version: Option<&str>) -> LoadOutcome {
        use std::sync::atomic::Ordering::Relaxed;

        let cache_key = keys::stub_cache_key(id, version);

        // Happy path: shared cache hit.
        match self.cache.get(&cache_key).await {
            Ok(Some(stub)) => {
                self.metrics.cache_hits.fetch_add(1, Relaxed);
                debug!(id, version = version.unwrap_or("latest"), "stub cache hit");
                return Ok(LoadedStub {
                    stub,
                    from_cache: true,
                    load_time_ms: 0,
                    retry_count: 0,
                    degraded: false,
                    degradation_reason: None,
                });
            }
            Ok(None) => {
                self.metrics.cache_misses.fetch_add(1, Relaxed);
            }
            Err(e) => {
                // A broken cache degrades to a plain load.
                warn!(id, error = %e, "stub cache read failed");
                self.metrics.cache_misses.fetch_add(1, Relaxed);
            }
        }

        // Breaker gate before anything else; an open breaker fails fast
        // even when a peer load is in flight.
        let breaker = self.breakers.for_id(id);
        let probe = match breaker.admit() {
            Admission::Allowed { probe } => probe,
            Admission::Rejected { state, retry_in } => {
                return Err(FunctionLoadError {
                    function_id: id.to_string(),
                    kind: LoadErrorKind::BreakerOpen,
                    message: format!(
                        "circuit breaker is {state}; retry in {}ms",
                        retry_in.as_millis()
                    ),
                    retry_count: 0,
                    breaker_state: state,
                    is_coalesced_request: false,
                });
            }
        };

        // Local coalescing: at most one leader load per id per instance.
        let flight_key = format!("{id}@{}", version.unwrap_or("latest"));
        enum Role {
            Leader(watch::Sender<Option<LoadOutcome>>, FlightGuard),
            Waiter(watch::Receiver<Option<LoadOutcome>>),
        }

        let role = {
            let mut in_flight = self.in_flight.lock().expect("in-flight map poisoned");
            if let Some(rx) = in_flight.get(&flight_key) {
                Role::Waiter(rx.clone())
            } else {
                let (tx, rx) = watch::channel(None);
                in_flight.insert(flight_key.clone(), rx);
                Role::Leader(
                    tx,
                    FlightGuard {
                        map: Arc::clone(&self.in_flight),
                        key: flight_key.clone(),
                    },
                )
            }
        };

        match role {
            Role::Waiter(mut rx) => {
                // This caller holds no probe slot of its own.
                if probe {
                    breaker.release_probe();
                }
                debug!(id, "coalescing onto in-flight load");
                let outcome = loop {
                    {
                        let current = rx.borrow_and_update();
                        if let Some(outcome) = current.as_ref() {
                            break outcome.clone();
                        }
                    }
                    if rx.changed().await.is_err() {
                        break Err(FunctionLoadError {
                            function_id: id.to_string(),
                            kind: LoadErrorKind::Upstream,
                            message: "in-flight load was abandoned".into(),
                            retry_count: 0,
                            breaker_state: breaker.state(),
                            is_coalesced_request: false,
                        });
                    }
                };
                outcome.map_err(|mut e| {
                    e.is_coalesced_request = true;
                    e
                })
            }
            Role::Leader(tx, _guard) => {
                self.metrics.loads.fetch_add(1, Relaxed);
                let outcome = self
                    .load_with_retry(id, version, &cache_key, &breaker, probe)
                    .await;
                match &outcome {
                    Ok(loaded) => {
                        self.metrics.successes.fetch_add(1, Relaxed);
                        self.metrics.record_load_time(loaded.load_time_ms);
                    }
                    Err(_) => {
                        self.metrics.failures.fetch_add(1, Relaxed);
                    }
                }
                let _ = tx.send(Some(outcome.clone()));
                outcome
                // _guard drops here, removing the in-flight entry.
            }
        }
    }

    async fn load_with_retry(
        &self,
        id: &str,
        version: Option<&str>,
        cache_key: &str,
        breaker: &Arc<CircuitBreaker>,
        probe: bool,
    ) -> LoadOutcome {
        use std::sync::atomic::Ordering::Relaxed;

        let started = Instant::now();
        let mut retry_count = 0u32;
        let mut probe_outstanding = probe;

        loop {
            match self.load_once(id, version, cache_key).await {
                Ok(stub) => {
                    breaker.on_success(probe_outstanding);
                    return Ok(LoadedStub {
                        stub,
                        from_cache: false,
                        load_time_ms: started.elapsed().as_millis() as u64,
                        retry_count,
                        degraded: false,
                        degradation_reason: None,
                    });
                }
                Err(cause) => {
                    breaker.on_failure(probe_outstanding);
                    probe_outstanding = false;

                    let transient = matches!(cause.kind, LoadErrorKind::Upstream)
                        && is_transient(&cause.message);
                    let exhausted = retry_count >= self.config.retry.max_retries;
                    let breaker_open = breaker.state() == BreakerState::Open;

                    if transient && !exhausted && !breaker_open {
                        let delay = self.config.retry.delay_for(retry_count);
                        retry_count += 1;
                        self.metrics.retries.fetch_add(1, Relaxed);
                        debug!(
                            id,
                            retry = retry_count,
                            delay_ms = delay.as_millis() as u64,
                            "retrying load"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    // Out of road. Try the configured fallback version.
                    if self.config.graceful_degradation
                        && let Some(fallback) = self.config.fallback_version.clone()
                        && version != Some(fallback.as_str())
                    {
                        let fallback_key = keys::stub_cache_key(id, Some(&fallback));
                        if let Ok(stub) =
                            self.load_once(id, Some(&fallback), &fallback_key).await
                        {
                            warn!(id, fallback, "serving degraded fallback version");
                            return Ok(LoadedStub {
                                stub,
                                from_cache: false,
                                load_time_ms: started.elapsed().as_millis() as u64,
                                retry_count,
                                degraded: true,
                                degradation_reason: Some(cause.message.clone()),
                            });
                        }
                    }

                    return Err(FunctionLoadError {
                        function_id: id.to_string(),
                        kind: cause.kind,
                        message: cause.message,
                        retry_count,
                        breaker_state: breaker.state(),
                        is_coalesced_request: false,
                    });
                }
            }
        }
    }

    /// One uncached load: fetch metadata, fetch code when required, build
    /// the stub, write through to the shared cache.
    async fn load_once(
        &self,
        id: &str,
        version: Option<&str>,
        cache_key: &str,
    ) -> Result<FunctionStub, LoadCause> {
        let mut metadata = match version {
            Some(v) if self.registry.supports_versions() => {
                self.registry.get_version(id, v).await
            }
            _ => self.registry.get_latest(id).await,
        }
        .map_err(|e| LoadCause {
            kind: match &e {
                ff_store::StoreError::Corrupt(_) => LoadErrorKind::Corrupt,
                _ => LoadErrorKind::Upstream,
            },
            message: e.to_string(),
        })?
        .ok_or_else(|| LoadCause {
            kind: LoadErrorKind::NotFound,
            message: format!("function '{id}' not found"),
        })?;

        // Registries without version support serve latest; pin the
        // requested version on the way out.
        if let Some(v) = version
            && !self.registry.supports_versions()
        {
            metadata.version = v.to_string();
        }

        let artifact = if matches!(metadata.kind, FunctionKind::Code(_)) {
            let artifact = self
                .code_store
                .get(id, version)
                .await
                .map_err(|e| LoadCause {
                    kind: LoadErrorKind::Upstream,
                    message: e.to_string(),
                })?
                .ok_or_else(|| LoadCause {
                    kind: LoadErrorKind::NotFound,
                    message: format!("code for '{id}' not found"),
                })?;
            Some(artifact)
        } else {
            None
        };

        let stub = FunctionStub::new(metadata, artifact);

        if let Err(e) = self.cache.put(cache_key, &stub, self.config.cache_ttl).await {
            warn!(id, error = %e, "stub cache write failed");
        }

        Ok(stub)
    }
}
