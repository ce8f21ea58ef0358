//! Mixture-of-experts request router.
//!
//! Routes chat requests across a roster of specialized model backends
//! ("experts") with keyword classification, ordered backup-chain failover,
//! per-expert circuit breaking, bounded retries, and graceful degradation of
//! vision requests when no vision expert is reachable.
//!
//! Entry point is [`Router::route`]: build a [`Router`] from a
//! [`config::RouterConfig`] and an [`invoke::ExpertInvoker`] implementation,
//! then feed it [`types::RequestContext`] values.

pub mod breaker;
pub mod classify;
pub mod config;
pub mod degrade;
pub mod error;
pub mod invoke;
pub mod latency;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod state;
pub mod types;

pub use error::RouterError;
pub use orchestrator::{RoutedResponse, Router};
