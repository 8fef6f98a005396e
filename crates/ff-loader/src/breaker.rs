// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-function circuit breakers.
//!
//! Closed passes loads through and counts consecutive failures; at the
//! failure threshold the breaker opens and fails fast until the reset
//! timeout elapses, then half-open admits a bounded number of probe loads.
//! Probe successes close the breaker after the success threshold; any
//! probe failure reopens it.
//!
//! Breaker state is per instance; defense in depth, not a global
//! coordination mechanism.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    /// Loads pass through; failures are counted.
    Closed,
    /// Loads fail fast until the reset timeout elapses.
    Open,
    /// A bounded number of probe loads test recovery.
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BreakerConfig {
    /// Consecutive failures (in closed) before opening.
    pub failure_threshold: u32,
    /// Probe successes (in half-open) before closing.
    pub success_threshold: u32,
    /// Cooldown before an open breaker admits probes, in milliseconds.
    pub reset_timeout_ms: u64,
    /// Concurrent probe loads admitted while half-open.
    pub max_half_open_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 30_000,
            max_half_open_requests: 1,
        }
    }
}

impl BreakerConfig {
    fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

/// Admission decision for one load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Proceed. `probe` marks a half-open probe slot that must be released
    /// via `on_success`/`on_failure`/`release_probe`.
    Allowed {
        /// Whether this load occupies a half-open probe slot.
        probe: bool,
    },
    /// Fail fast.
    Rejected {
        /// State at rejection time.
        state: BreakerState,
        /// How long until the next admission attempt can succeed.
        retry_in: Duration,
    },
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSnapshot {
    /// Current state.
    pub state: BreakerState,
    /// Failure count in the current window.
    pub failures: u32,
    /// Probe successes while half-open.
    pub successes: u32,
    /// Last recorded failure.
    pub last_failure: Option<Instant>,
    /// Last state transition.
    pub last_transition: Instant,
    /// In-flight probe loads.
    pub half_open_in_flight: u32,
}

struct Inner {
    state: BreakerState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
    last_transition: Instant,
    half_open_in_flight: u32,
}

/// A single function's circuit breaker.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// New breaker in the closed state.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                successes: 0,
                last_failure: None,
                last_transition: Instant::now(),
                half_open_in_flight: 0,
            }),
        }
    }

    /// Ask to start a load.
    pub fn admit(&self) -> Admission {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed => Admission::Allowed { probe: false },
            BreakerState::Open => {
                let elapsed = inner.last_transition.elapsed();
                if elapsed < self.config.reset_timeout() {
                    return Admission::Rejected {
                        state: BreakerState::Open,
                        retry_in: self.config.reset_timeout() - elapsed,
                    };
                }
                Self::transition(&mut inner, BreakerState::HalfOpen);
                inner.half_open_in_flight = 1;
                Admission::Allowed { probe: true }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_in_flight >= self.config.max_half_open_requests {
                    return Admission::Rejected {
                        state: BreakerState::HalfOpen,
                        retry_in: Duration::ZERO,
                    };
                }
                inner.half_open_in_flight += 1;
                Admission::Allowed { probe: true }
            }
        }
    }

    /// Record a successful load.
    pub fn on_success(&self, probe: bool) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        if probe {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
        match inner.state {
            BreakerState::Closed => inner.failures = 0,
            BreakerState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    info!("circuit breaker closing after successful probes");
                    Self::transition(&mut inner, BreakerState::Closed);
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed load.
    pub fn on_failure(&self, probe: bool) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        if probe {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    warn!(failures = inner.failures, "circuit breaker opening");
                    Self::transition(&mut inner, BreakerState::Open);
                }
            }
            // Any failure while probing reopens immediately.
            BreakerState::HalfOpen => {
                warn!("probe load failed, circuit breaker reopening");
                Self::transition(&mut inner, BreakerState::Open);
            }
            BreakerState::Open => inner.failures += 1,
        }
    }

    /// Release a probe slot without recording an outcome (the caller
    /// coalesced onto another load instead of running its own).
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker mutex poisoned").state
    }

    /// Point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().expect("breaker mutex poisoned");
        BreakerSnapshot {
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
            last_failure: inner.last_failure,
            last_transition: inner.last_transition,
            half_open_in_flight: inner.half_open_in_flight,
        }
    }

    fn transition(inner: &mut Inner, to: BreakerState) {
        inner.state = to;
        inner.last_transition = Instant::now();
        inner.successes = 0;
        if to == BreakerState::Closed {
            inner.failures = 0;
        }
        if to != BreakerState::HalfOpen {
            inner.half_open_in_flight = 0;
        }
    }
}

/// Per-id breaker table.
pub struct BreakerTable {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerTable {
    /// Empty table; breakers are created on first use.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch (or create) the breaker for `id`.
    #[must_use]
    pub fn for_id(&self, id: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("breaker table poisoned");
        Arc::clone(
            breakers
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone()))),
        )
    }

    /// Drop the breaker for `id`, resetting it to closed on next use.
    pub fn reset(&self, id: &str) {
        self.breakers
            .lock()
            .expect("breaker table poisoned")
            .remove(id);
    }

    /// Count breakers by state: `(closed, open, half_open)`.
    #[must_use]
    pub fn state_counts(&self) -> (usize, usize, usize) {
        let breakers = self.breakers.lock().expect("breaker table poisoned");
        let mut counts = (0, 0, 0);
        for breaker in breakers.values() {
            match breaker.state() {
                BreakerState::Closed => counts.0 += 1,
                BreakerState::Open => counts.1 += 1,
                BreakerState::HalfOpen => counts.2 += 1,
            }
        }
        counts
    }

    /// Number of tracked breakers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.lock().expect("breaker table poisoned").len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
