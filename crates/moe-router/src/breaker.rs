//! Per-expert circuit breaker and quarantine store.
//!
//! State machine per expert: **Closed** (eligible) ⇄ **Quarantined**
//! (ineligible). An expert trips Closed → Quarantined when its consecutive
//! failures reach the configured threshold without an intervening success.
//! Quarantine lifts at the reset boundary — a fixed TTL here, checked lazily
//! on read — or on an explicit external reset (e.g. from a health probe).
//!
//! A success at any time resets the counter to zero but does not clear an
//! active quarantine before its boundary.
//!
//! The table is the only state shared across concurrently in-flight
//! requests. Entries live in a `DashMap`; every read-modify-write goes
//! through the map's per-key entry lock, so updates to one expert's counter
//! are linearizable and concurrent failures never under-count toward the
//! threshold.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::types::Outcome;

/// Breaker tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before quarantine.
    pub threshold: u32,
    /// How long a quarantine lasts before the expert is eligible again.
    pub quarantine_ttl: Duration,
}

/// Observable state of one expert's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Eligible for selection.
    Closed,
    /// Ineligible until the quarantine boundary passes.
    Quarantined,
}

#[derive(Debug, Default)]
struct CircuitEntry {
    consecutive_failures: u32,
    quarantined_until: Option<Instant>,
}

impl CircuitEntry {
    /// Lift an expired quarantine in place. Counter restarts at zero for the
    /// new boundary period.
    fn expire(&mut self, now: Instant) {
        if self.quarantined_until.is_some_and(|until| now >= until) {
            self.quarantined_until = None;
            self.consecutive_failures = 0;
        }
    }
}

/// Shared, concurrency-safe quarantine store.
pub struct CircuitBreaker {
    entries: DashMap<String, CircuitEntry>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Whether the expert is currently quarantined.
    ///
    /// Expired quarantines are lifted lazily here, so a read after the
    /// boundary observes `Closed` without any background task.
    pub fn is_quarantined(&self, expert_id: &str) -> bool {
        let Some(mut entry) = self.entries.get_mut(expert_id) else {
            return false;
        };
        let now = Instant::now();
        entry.expire(now);
        entry.quarantined_until.is_some()
    }

    /// Observable circuit state for the expert.
    pub fn state(&self, expert_id: &str) -> CircuitState {
        if self.is_quarantined(expert_id) {
            CircuitState::Quarantined
        } else {
            CircuitState::Closed
        }
    }

    /// Record the final outcome of one attempt slot.
    ///
    /// Retries within a slot must be collapsed by the caller first: retry
    /// exhaustion counts as ONE failure, not one per retry.
    ///
    /// Returns `true` when this outcome newly tripped the breaker, so the
    /// caller can emit a single activation event per quarantine.
    pub fn record_outcome(&self, expert_id: &str, outcome: Outcome) -> bool {
        let mut entry = self.entries.entry(expert_id.to_string()).or_default();
        let now = Instant::now();
        entry.expire(now);

        if !outcome.is_failure() {
            entry.consecutive_failures = 0;
            return false;
        }

        entry.consecutive_failures += 1;
        debug!(
            expert = expert_id,
            outcome = %outcome,
            consecutive_failures = entry.consecutive_failures,
            "failure recorded"
        );

        if entry.consecutive_failures >= self.config.threshold && entry.quarantined_until.is_none()
        {
            entry.quarantined_until = Some(now + self.config.quarantine_ttl);
            warn!(
                expert = expert_id,
                threshold = self.config.threshold,
                ttl_secs = self.config.quarantine_ttl.as_secs(),
                "circuit breaker tripped, expert quarantined"
            );
            return true;
        }
        false
    }

    /// Current consecutive-failure count (0 for unknown experts).
    pub fn consecutive_failures(&self, expert_id: &str) -> u32 {
        self.entries
            .get(expert_id)
            .map(|e| e.consecutive_failures)
            .unwrap_or(0)
    }

    /// Explicit external reset of one expert: clears quarantine and counter.
    pub fn reset(&self, expert_id: &str) {
        self.entries.remove(expert_id);
    }

    /// Reset every expert's circuit.
    pub fn reset_all(&self) {
        self.entries.clear();
    }
}
