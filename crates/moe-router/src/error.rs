//! Routing error taxonomy.
//!
//! Only two conditions are ever visible to the caller as errors:
//! `UnknownExpert` (a configuration or classification bug, surfaced
//! immediately, never retried) and `ChainExhausted` (every chain entry failed
//! or was quarantined, after degradation has also been tried where it
//! applies). All per-attempt failures are handled inside the orchestrator and
//! classified via [`crate::types::Outcome`].

use thiserror::Error;

use crate::types::AttemptRecord;

/// Errors surfaced by the routing core.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The requested expert id is not present in the registry.
    #[error("unknown expert id '{0}'")]
    UnknownExpert(String),

    /// Every entry in the resolved chain failed or was quarantined.
    ///
    /// Carries the full attempt log for diagnosis.
    #[error("expert chain exhausted after {} attempts: [{}]", attempts.len(), summarize(attempts))]
    ChainExhausted { attempts: Vec<AttemptRecord> },
}

fn summarize(attempts: &[AttemptRecord]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}={}", a.expert_id, a.outcome))
        .collect::<Vec<_>>()
        .join(", ")
}
