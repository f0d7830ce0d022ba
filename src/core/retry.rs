//! Backoff policy for transient completion failures.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::completion::CompletionError;

/// Configuration for retrying overloaded requests.
///
/// The delay before retry `n` (1-based count of failed attempts) is
/// `min(2^n * base_delay_ms + jitter, max_delay_ms)` where jitter is drawn
/// uniformly from `0..=jitter_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Number of retries after the initial attempt.
    /// Default: 3
    pub max_retries: u32,

    /// Base delay multiplied by `2^attempt` (milliseconds).
    /// Default: 2000ms
    pub base_delay_ms: u64,

    /// Upper bound of the random jitter added to each delay (milliseconds).
    /// Default: 1000ms
    pub jitter_ms: u64,

    /// Maximum delay between attempts (milliseconds).
    /// Default: 64000ms
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2000,
            jitter_ms: 1000,
            max_delay_ms: 64_000,
        }
    }
}

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay_ms: u64,
}

impl RetryDecision {
    pub fn give_up() -> Self {
        Self {
            retry: false,
            delay_ms: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl RetryPolicy {
    /// Create a policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Decide whether to retry after failed attempt number `attempt`
    /// (counting from 1). Only overloaded responses are retried.
    pub fn should_retry(&self, attempt: u32, error: &CompletionError) -> RetryDecision {
        if !error.is_transient() || attempt == 0 || attempt > self.max_retries {
            return RetryDecision::give_up();
        }
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        RetryDecision {
            retry: true,
            delay_ms: self.delay_with_jitter(attempt, jitter),
        }
    }

    /// Delay for `attempt` with an explicit jitter value.
    pub fn delay_with_jitter(&self, attempt: u32, jitter_ms: u64) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .saturating_add(jitter_ms)
            .min(self.max_delay_ms)
    }
}
