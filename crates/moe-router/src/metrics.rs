//! In-process metric events emitted by the routing core.
//!
//! The core emits; a collaborator metrics layer owns storage and export.
//! Counters here are held in concurrent maps so concurrently routed requests
//! can record without coordination, and `snapshot()` gives tests and the
//! surrounding service a consistent read.
//!
//! Events:
//! - fallback invocation, keyed by (from_expert, to_expert)
//! - circuit-breaker activation, keyed by expert
//! - per-expert latency observation
//! - degraded-response count

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct LatencyStats {
    count: u64,
    total_ms: u64,
    max_ms: u64,
}

/// Shared metric counters for one router instance.
#[derive(Default)]
pub struct RouterMetrics {
    fallbacks: DashMap<(String, String), u64>,
    breaker_activations: DashMap<String, u64>,
    latencies: DashMap<String, LatencyStats>,
    degraded: AtomicU64,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// One failover hop: `from` was unavailable, `to` is being attempted.
    pub fn record_fallback(&self, from: &str, to: &str) {
        info!(from_expert = from, to_expert = to, "fallback invoked");
        *self
            .fallbacks
            .entry((from.to_string(), to.to_string()))
            .or_insert(0) += 1;
    }

    /// The breaker newly quarantined `expert`.
    pub fn record_breaker_activation(&self, expert: &str) {
        warn!(expert, "circuit breaker activated");
        *self.breaker_activations.entry(expert.to_string()).or_insert(0) += 1;
    }

    /// Observed latency of one attempt slot against `expert`.
    pub fn observe_latency(&self, expert: &str, latency: Duration) {
        let ms = latency.as_millis() as u64;
        let mut stats = self.latencies.entry(expert.to_string()).or_default();
        stats.count += 1;
        stats.total_ms += ms;
        stats.max_ms = stats.max_ms.max(ms);
    }

    /// A response was served degraded (image content dropped).
    pub fn record_degraded(&self) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent point-in-time view, sorted for deterministic output.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut fallbacks: Vec<FallbackCount> = self
            .fallbacks
            .iter()
            .map(|e| FallbackCount {
                from_expert: e.key().0.clone(),
                to_expert: e.key().1.clone(),
                count: *e.value(),
            })
            .collect();
        fallbacks.sort_by(|a, b| {
            (a.from_expert.as_str(), a.to_expert.as_str())
                .cmp(&(b.from_expert.as_str(), b.to_expert.as_str()))
        });

        let mut breaker_activations: Vec<(String, u64)> = self
            .breaker_activations
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        breaker_activations.sort();

        let mut latencies: Vec<LatencySummary> = self
            .latencies
            .iter()
            .map(|e| LatencySummary {
                expert: e.key().clone(),
                count: e.value().count,
                mean_ms: if e.value().count == 0 {
                    0
                } else {
                    e.value().total_ms / e.value().count
                },
                max_ms: e.value().max_ms,
            })
            .collect();
        latencies.sort_by(|a, b| a.expert.cmp(&b.expert));

        MetricsSnapshot {
            fallbacks,
            breaker_activations,
            latencies,
            degraded: self.degraded.load(Ordering::Relaxed),
        }
    }
}

/// Fallback hop count.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FallbackCount {
    pub from_expert: String,
    pub to_expert: String,
    pub count: u64,
}

/// Per-expert latency summary.
#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub expert: String,
    pub count: u64,
    pub mean_ms: u64,
    pub max_ms: u64,
}

/// Point-in-time view of all counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub fallbacks: Vec<FallbackCount>,
    pub breaker_activations: Vec<(String, u64)>,
    pub latencies: Vec<LatencySummary>,
    pub degraded: u64,
}

impl MetricsSnapshot {
    /// Fallback count for a specific (from, to) pair.
    pub fn fallback_count(&self, from: &str, to: &str) -> u64 {
        self.fallbacks
            .iter()
            .find(|f| f.from_expert == from && f.to_expert == to)
            .map(|f| f.count)
            .unwrap_or(0)
    }

    /// Breaker activation count for an expert.
    pub fn activation_count(&self, expert: &str) -> u64 {
        self.breaker_activations
            .iter()
            .find(|(e, _)| e == expert)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }
}
