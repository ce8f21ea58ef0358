//! Latency monitor: per-attempt deadline with cancellation.
//!
//! Wraps a single expert invocation in `tokio::time::timeout`. On expiry the
//! wrapped future is dropped, which aborts the underlying HTTP request —
//! best-effort cancellation: the remote side may still complete and bill,
//! but the result is discarded and never observed by the caller.
//! Cancellation never blocks; the orchestrator proceeds immediately to the
//! next chain entry.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Raised (as a value, not a panic) when an attempt exceeds its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlineExceeded {
    pub expert_id: String,
    pub deadline: Duration,
}

/// Deadline wrapper around one expert invocation.
#[derive(Debug, Clone, Copy)]
pub struct LatencyMonitor {
    deadline: Duration,
}

impl LatencyMonitor {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run `fut` under the deadline. Returns the future's output, or
    /// `DeadlineExceeded` after cancelling the in-flight call.
    pub async fn watch<F, T>(&self, expert_id: &str, fut: F) -> Result<T, DeadlineExceeded>
    where
        F: Future<Output = T>,
    {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(output) => Ok(output),
            Err(_) => {
                warn!(
                    expert = expert_id,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "attempt exceeded deadline, cancelling in-flight call"
                );
                Err(DeadlineExceeded {
                    expert_id: expert_id.to_string(),
                    deadline: self.deadline,
                })
            }
        }
    }
}
