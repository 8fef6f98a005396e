// SPDX-License-Identifier: MIT OR Apache-2.0
//! Retry policy for transient load failures.
//!
//! Delays follow `initial * multiplier^attempt` capped at `max_delay`, with
//! optional ±25 % jitter. Non-transient failures (not-found, invalid,
//! unauthorized) are never retried.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Jitter applied to computed delays when enabled.
const JITTER_FRACTION: f64 = 0.25;

/// Exponential-backoff retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// First retry delay, in milliseconds.
    pub initial_delay_ms: u64,
    /// Backoff multiplier per attempt.
    pub multiplier: f64,
    /// Delay cap, in milliseconds.
    pub max_delay_ms: u64,
    /// Apply ±25 % jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 5_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let mut millis = (self.initial_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        if self.jitter {
            let spread = millis * JITTER_FRACTION;
            millis += rand::random::<f64>() * spread * 2.0 - spread;
        }
        Duration::from_millis(millis.max(0.0) as u64)
    }
}

/// Whether a failure message describes a transient condition worth
/// retrying.
#[must_use]
pub fn is_transient(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    !(lowered.contains("not found")
        || lowered.contains("invalid")
        || lowered.contains("unauthorized"))
}
