//! Routing state machine — explicit states and legal transition guards.
//!
//! Typed state model for one request's journey through the orchestrator, so
//! every transition is auditable and illegal ones are caught by `advance()`
//! guards rather than silently skipped steps.
//!
//! ```text
//! Resolving → Attempting | Degrading | Exhausted
//! Attempting → Attempting | Succeeded | Degrading | Exhausted
//! Degrading → Attempting | Exhausted
//! ```
//!
//! `Succeeded` and `Exhausted` are terminal. `Attempting → Attempting`
//! covers moving to the next chain entry. A chain whose every entry is
//! quarantined produces no `Attempting` state at all, hence the direct
//! `Resolving → Degrading` and `Degrading → Exhausted` edges.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// States of one routed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteState {
    /// Classifying the request and resolving the backup chain.
    Resolving,
    /// Attempting one expert from the chain (retries happen inside).
    Attempting,
    /// Chain exhausted for a vision request — stripping images and re-routing.
    Degrading,
    /// An expert served the request — terminal.
    Succeeded,
    /// Every eligible expert failed — terminal.
    Exhausted,
}

impl RouteState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted)
    }
}

impl fmt::Display for RouteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolving => write!(f, "Resolving"),
            Self::Attempting => write!(f, "Attempting"),
            Self::Degrading => write!(f, "Degrading"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Exhausted => write!(f, "Exhausted"),
        }
    }
}

/// A single recorded transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: RouteState,
    pub to: RouteState,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    /// Context for the transition (e.g. which expert is being attempted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: RouteState,
    pub to: RouteState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal route transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

fn is_legal_transition(from: RouteState, to: RouteState) -> bool {
    use RouteState::*;
    matches!(
        (from, to),
        (Resolving, Attempting)
            | (Resolving, Degrading)
            | (Resolving, Exhausted)
            | (Attempting, Attempting)
            | (Attempting, Succeeded)
            | (Attempting, Degrading)
            | (Attempting, Exhausted)
            | (Degrading, Attempting)
            | (Degrading, Exhausted)
    )
}

/// Per-request state machine with a full transition log.
pub struct RouteStateMachine {
    current: RouteState,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl RouteStateMachine {
    /// Start at `Resolving`.
    pub fn new() -> Self {
        Self {
            current: RouteState::Resolving,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> RouteState {
        self.current
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Advance to `to`, recording the transition.
    pub fn advance(&mut self, to: RouteState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(from = %self.current, to = %to, reason, "route transition");
        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }
}

impl Default for RouteStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
