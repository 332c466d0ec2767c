//! Retry delays for the worker loop
//!
//! The loop sleeps after an empty or lost allocation and after a failed job.
//! A successful job resets the sequence.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long to wait before the next attempt
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Same delay every time
    Fixed { delay_ms: u64 },
    /// `initial_ms * multiplier^attempt`, capped at `max_ms`
    Exponential {
        initial_ms: u64,
        max_ms: u64,
        multiplier: f64,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            initial_ms: 1_000,
            max_ms: 60_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            BackoffPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            BackoffPolicy::Exponential {
                initial_ms,
                max_ms,
                multiplier,
            } => {
                let factor = multiplier.max(1.0).powi(attempt.min(64) as i32);
                let ms = (initial_ms as f64 * factor).min(max_ms as f64);
                Duration::from_millis(ms as u64)
            }
        }
    }
}

/// Attempt counter over a [`BackoffPolicy`]
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay for the current attempt; advances the counter
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
