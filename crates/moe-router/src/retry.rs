//! Retry policy: pure (outcome, attempt) → (retry?, delay).
//!
//! Transport-independent so it can be unit-tested without a network. Only
//! `rate_limited` (429) and `server_error` (5xx) outcomes are retried, on the
//! same expert, up to `max_tries` total calls including the first.
//! `client_error` and `timeout` are never retried — the orchestrator proceeds
//! straight to the next chain entry.

use std::time::Duration;

use crate::config::RouterConfig;
use crate::types::Outcome;

/// Exponential-backoff retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Max calls per expert within one attempt slot, including the first.
    pub max_tries: u32,
    /// Delay before the first retry; doubles per retry.
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RouterConfig) -> Self {
        Self {
            max_tries: config.max_retries,
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
        }
    }

    /// Whether to retry the same expert after `outcome`, given that
    /// `tries_so_far` calls have already been issued (1-based).
    pub fn should_retry(&self, outcome: Outcome, tries_so_far: u32) -> bool {
        if tries_so_far >= self.max_tries {
            return false;
        }
        matches!(outcome, Outcome::RateLimited | Outcome::ServerError)
    }

    /// Backoff before the next try: `base × 2^(tries_so_far − 1)`, capped.
    pub fn backoff_delay(&self, tries_so_far: u32) -> Duration {
        // Cap the exponent so the shift cannot overflow before the min().
        let exp = tries_so_far.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }
}
