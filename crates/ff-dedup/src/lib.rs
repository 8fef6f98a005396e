// SPDX-License-Identifier: MIT OR Apache-2.0
//! ff-dedup
//!
//! Request-coalescing deduplication: when multiple callers issue the same
//! invocation concurrently, the first becomes the *leader* and executes;
//! everyone else awaits the leader's settled outcome and receives an
//! equivalent response rebuilt from an immutable snapshot. A second call
//! after the first settles executes afresh.
//!
//! The map is per instance. Entries are keyed by the invocation
//! fingerprint, removed when the leader settles, and evicted by TTL as a
//! safety net against executions that never settle.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::debug;

/// Default entry TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Immutable snapshot of a settled response.
///
/// Every caller materializes a fresh response from this snapshot, so one
/// caller consuming its body never affects a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
    /// HTTP status code.
    pub status: u16,
    /// Response headers worth replaying.
    pub headers: Vec<(String, String)>,
    /// Body bytes.
    pub body: Vec<u8>,
}

/// Failure of a deduplicated execution, fanned out to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("deduplicated execution failed: {message}")]
pub struct ExecutionFailure {
    /// What went wrong.
    pub message: String,
}

impl ExecutionFailure {
    /// Build a failure from any displayable error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

type Outcome = Result<ResponseSnapshot, ExecutionFailure>;

/// A settled dedup response plus whether it was served from a peer's
/// execution.
#[derive(Debug, Clone)]
pub struct DedupResult {
    /// The response snapshot.
    pub snapshot: ResponseSnapshot,
    /// `true` when this caller awaited a peer (gets `X-Deduplicated`).
    pub deduplicated: bool,
}

struct Entry {
    created_at: Instant,
    generation: u64,
    rx: watch::Receiver<Option<Outcome>>,
}

/// The fingerprint → in-flight execution map.
pub struct DedupMap {
    enabled: bool,
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
    generation: AtomicU64,
}

impl DedupMap {
    /// Enabled map with the given TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            enabled: true,
            ttl,
            entries: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Disabled map: `dedup_or_execute` calls through unconditionally.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ttl: DEFAULT_TTL,
            entries: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Number of live entries (expired ones included until the next call).
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the map currently holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Empty the map. In-flight leaders still settle their own callers.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Execute-or-join for `fingerprint`.
    ///
    /// At most one `execute` runs concurrently per fingerprint. Waiters
    /// observe the leader's outcome: successes as fresh responses flagged
    /// `deduplicated`, failures as equivalent [`ExecutionFailure`]s.
    pub async fn dedup_or_execute<F, Fut>(
        &self,
        fingerprint: &str,
        execute: F,
    ) -> Result<DedupResult, ExecutionFailure>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        if !self.enabled {
            return execute().await.map(|snapshot| DedupResult {
                snapshot,
                deduplicated: false,
            });
        }

        enum Role {
            Leader {
                tx: watch::Sender<Option<Outcome>>,
                generation: u64,
            },
            Waiter {
                rx: watch::Receiver<Option<Outcome>>,
            },
        }

        let role = {
            let mut entries = self.entries.lock().await;
            entries.retain(|_, entry| entry.created_at.elapsed() < self.ttl);

            if let Some(entry) = entries.get(fingerprint) {
                Role::Waiter {
                    rx: entry.rx.clone(),
                }
            } else {
                let (tx, rx) = watch::channel(None);
                let generation = self.generation.fetch_add(1, Relaxed);
                entries.insert(
                    fingerprint.to_string(),
                    Entry {
                        created_at: Instant::now(),
                        generation,
                        rx,
                    },
                );
                Role::Leader { tx, generation }
            }
        };

        match role {
            Role::Waiter { mut rx } => {
                debug!(fingerprint, "joining in-flight execution");
                let outcome = loop {
                    {
                        let current = rx.borrow_and_update();
                        if let Some(outcome) = current.as_ref() {
                            break outcome.clone();
                        }
                    }
                    if rx.changed().await.is_err() {
                        // Leader unwound without publishing.
                        return Err(ExecutionFailure::new("coalesced execution was abandoned"));
                    }
                };
                outcome.map(|snapshot| DedupResult {
                    snapshot,
                    deduplicated: true,
                })
            }
            Role::Leader { tx, generation } => {
                let outcome = execute().await;

                // Publish before removal so a waiter that grabbed the
                // receiver always observes the settled value.
                let _ = tx.send(Some(outcome.clone()));

                let mut entries = self.entries.lock().await;
                if entries
                    .get(fingerprint)
                    .is_some_and(|entry| entry.generation == generation)
                {
                    entries.remove(fingerprint);
                }
                drop(entries);

                outcome.map(|snapshot| DedupResult {
                    snapshot,
                    deduplicated: false,
                })
            }
        }
    }
}

impl Default for DedupMap {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
