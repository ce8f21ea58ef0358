//! The orchestrator: drives one request end-to-end.
//!
//! Classify → resolve chain → attempt experts in order (skipping quarantined
//! ones) → record outcomes in the breaker → degrade vision requests whose
//! chain is exhausted → return the final result plus which expert served it
//! and whether it was degraded.
//!
//! Concurrency model: the surrounding server handles requests concurrently;
//! within one request the attempt loop is strictly sequential — backups are
//! never attempted speculatively in parallel, to avoid duplicate billed
//! calls. Attempt N+1 never starts before attempt N's outcome has been
//! recorded in the circuit breaker. The breaker table is the only state
//! shared across in-flight requests.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::classify::Classifier;
use crate::config::RouterConfig;
use crate::degrade::degrade_to_text;
use crate::error::RouterError;
use crate::invoke::{ExpertInvoker, ExpertReply};
use crate::latency::LatencyMonitor;
use crate::metrics::RouterMetrics;
use crate::registry::{ExpertRegistry, Modality};
use crate::retry::RetryPolicy;
use crate::state::{RouteState, RouteStateMachine};
use crate::types::{AttemptRecord, Outcome, RequestContext};

/// Final result of one routed request.
#[derive(Debug, Clone, Serialize)]
pub struct RoutedResponse {
    /// The serving expert's reply.
    pub response: ExpertReply,
    /// Which expert actually served the request.
    pub served_by: String,
    /// Whether the response was served degraded (image content dropped).
    pub degraded: bool,
    /// Caller-visible warnings accumulated on the request.
    pub warnings: Vec<String>,
    /// Full attempt log, in order.
    pub attempts: Vec<AttemptRecord>,
}

/// Routing engine over a fixed registry and a shared circuit breaker.
pub struct Router {
    registry: Arc<ExpertRegistry>,
    classifier: Classifier,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    latency: LatencyMonitor,
    invoker: Arc<dyn ExpertInvoker>,
    metrics: Arc<RouterMetrics>,
}

fn advance(sm: &mut RouteStateMachine, to: RouteState, reason: Option<&str>) {
    // Transitions are driven in a fixed order; an illegal one is a bug, not
    // a request failure.
    if let Err(err) = sm.advance(to, reason) {
        error!(%err, "route state machine out of sync");
    }
}

impl Router {
    /// Build a router from configuration and an invoker implementation.
    pub fn new(config: &RouterConfig, invoker: Arc<dyn ExpertInvoker>) -> Self {
        let registry = Arc::new(ExpertRegistry::from_config(&config.experts));
        let classifier = Classifier::new(Arc::clone(&registry), &config.experts);
        Self {
            registry,
            classifier,
            breaker: Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
                threshold: config.circuit_breaker_threshold,
                quarantine_ttl: config.quarantine_ttl,
            })),
            retry: RetryPolicy::from_config(config),
            latency: LatencyMonitor::new(config.max_latency),
            invoker,
            metrics: Arc::new(RouterMetrics::new()),
        }
    }

    /// Assemble a router from pre-built parts (embedding, tests).
    pub fn from_parts(
        registry: Arc<ExpertRegistry>,
        classifier: Classifier,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        latency: LatencyMonitor,
        invoker: Arc<dyn ExpertInvoker>,
        metrics: Arc<RouterMetrics>,
    ) -> Self {
        Self {
            registry,
            classifier,
            breaker,
            retry,
            latency,
            invoker,
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<ExpertRegistry> {
        &self.registry
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn metrics(&self) -> &Arc<RouterMetrics> {
        &self.metrics
    }

    /// Route one request: the single entry point for the surrounding API
    /// layer.
    ///
    /// Errors reaching the caller are limited to [`RouterError::UnknownExpert`]
    /// (bad explicit override) and [`RouterError::ChainExhausted`] after
    /// degradation has also failed; every other failure is absorbed by
    /// failover.
    pub async fn route(&self, ctx: RequestContext) -> Result<RoutedResponse, RouterError> {
        let mut sm = RouteStateMachine::new();

        let primary = self.classifier.classify(&ctx)?;
        let chain = self.registry.resolve_chain(&primary)?;
        info!(
            request_id = %ctx.request_id,
            primary = %primary,
            chain = ?chain,
            "chain resolved"
        );

        let mut attempts = Vec::new();
        if let Some((served_by, reply)) = self.run_chain(&ctx, &chain, &mut attempts, &mut sm).await
        {
            advance(&mut sm, RouteState::Succeeded, Some(served_by.as_str()));
            return Ok(RoutedResponse {
                response: reply,
                served_by,
                degraded: false,
                warnings: ctx.warnings.clone(),
                attempts,
            });
        }

        // Vision requests get one degraded pass against the text tiers
        // before the request is failed.
        let vision_request = self
            .registry
            .get(&primary)
            .is_some_and(|e| e.modality == Modality::Vision);
        if vision_request {
            advance(&mut sm, RouteState::Degrading, Some("vision chain exhausted"));
            let degraded_ctx = degrade_to_text(&ctx);
            let degraded_primary = self.classifier.classify(&degraded_ctx)?;
            let degraded_chain = self.registry.resolve_chain(&degraded_primary)?;
            info!(
                request_id = %ctx.request_id,
                primary = %degraded_primary,
                "retrying with text-only chain"
            );

            if let Some((served_by, reply)) = self
                .run_chain(&degraded_ctx, &degraded_chain, &mut attempts, &mut sm)
                .await
            {
                advance(&mut sm, RouteState::Succeeded, Some(served_by.as_str()));
                self.metrics.record_degraded();
                return Ok(RoutedResponse {
                    response: reply,
                    served_by,
                    degraded: true,
                    warnings: degraded_ctx.warnings.clone(),
                    attempts,
                });
            }
        }

        advance(&mut sm, RouteState::Exhausted, None);
        Err(RouterError::ChainExhausted { attempts })
    }

    /// Walk one resolved chain sequentially. Returns the serving expert and
    /// its reply, or `None` when every eligible entry failed.
    ///
    /// The seen-set guarantees no expert is attempted twice within one chain
    /// resolution, even if it reappears in a nested backup list.
    async fn run_chain(
        &self,
        ctx: &RequestContext,
        chain: &[String],
        attempts: &mut Vec<AttemptRecord>,
        sm: &mut RouteStateMachine,
    ) -> Option<(String, ExpertReply)> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut last_unavailable: Option<String> = None;

        for expert_id in chain {
            if !seen.insert(expert_id.as_str()) {
                continue;
            }
            if self.breaker.is_quarantined(expert_id) {
                debug!(
                    request_id = %ctx.request_id,
                    expert = %expert_id,
                    "skipping quarantined expert"
                );
                last_unavailable = Some(expert_id.clone());
                continue;
            }

            advance(sm, RouteState::Attempting, Some(expert_id.as_str()));
            if let Some(from) = last_unavailable.take() {
                self.metrics.record_fallback(&from, expert_id);
            }

            let (record, reply) = self.attempt(ctx, expert_id).await;

            // Outcome is recorded before the next chain entry is considered.
            if self.breaker.record_outcome(expert_id, record.outcome) {
                self.metrics.record_breaker_activation(expert_id);
            }
            self.metrics
                .observe_latency(expert_id, Duration::from_millis(record.latency_ms));
            let outcome = record.outcome;
            attempts.push(record);

            match reply {
                Some(reply) => return Some((expert_id.clone(), reply)),
                None => {
                    warn!(
                        request_id = %ctx.request_id,
                        expert = %expert_id,
                        outcome = %outcome,
                        "attempt failed, advancing chain"
                    );
                    last_unavailable = Some(expert_id.clone());
                }
            }
        }
        None
    }

    /// One attempt slot against one expert: the latency-monitored call plus
    /// any same-expert retries. Retry exhaustion collapses into a single
    /// failure record.
    async fn attempt(
        &self,
        ctx: &RequestContext,
        expert_id: &str,
    ) -> (AttemptRecord, Option<ExpertReply>) {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut tries = 0u32;

        let (outcome, reply) = loop {
            tries += 1;
            let call = self.invoker.invoke(expert_id, &ctx.messages);
            match self.latency.watch(expert_id, call).await {
                // Deadline expiry is never retried on the same expert.
                Err(_) => break (Outcome::Timeout, None),
                Ok(Ok(reply)) => break (Outcome::Success, Some(reply)),
                Ok(Err(failure)) => {
                    let outcome = failure.outcome();
                    if self.retry.should_retry(outcome, tries) {
                        let delay = self.retry.backoff_delay(tries);
                        debug!(
                            request_id = %ctx.request_id,
                            expert = %expert_id,
                            %failure,
                            tries,
                            delay_ms = delay.as_millis() as u64,
                            "transient failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    break (outcome, None);
                }
            }
        };

        let record = AttemptRecord {
            expert_id: expert_id.to_string(),
            started_at,
            outcome,
            latency_ms: start.elapsed().as_millis() as u64,
            tries,
        };
        (record, reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExpertIdConfig;
    use crate::degrade::IMAGE_DROPPED_WARNING;
    use crate::invoke::{InvokeFailure, MockExpertInvoker};
    use crate::types::ChatMessage;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    const REASONING: &str = "deepseek-v3.1:671b-cloud";
    const FALLBACK: &str = "gpt-oss:20b-cloud";
    const ENTERPRISE: &str = "gpt-oss:120b-cloud";
    const CODE: &str = "qwen3-coder:480b-cloud";
    const VISION: &str = "qwen3-vl:235b-cloud";
    const VISION_THINKING: &str = "qwen3-vl:235b-instruct-cloud";

    #[derive(Clone, Copy)]
    enum Step {
        Ok,
        Http(u16),
        Hang,
    }

    /// Per-expert scripted invoker: pops the next step per call, defaults to
    /// a successful reply when the script runs out.
    struct ScriptedInvoker {
        scripts: Mutex<HashMap<String, VecDeque<Step>>>,
        calls: Mutex<Vec<(String, bool)>>,
    }

    impl ScriptedInvoker {
        fn new() -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn script(&self, expert: &str, steps: &[Step]) {
            self.scripts
                .lock()
                .unwrap()
                .insert(expert.to_string(), steps.iter().copied().collect());
        }

        fn calls(&self) -> Vec<(String, bool)> {
            self.calls.lock().unwrap().clone()
        }

        fn calls_to(&self, expert: &str) -> usize {
            self.calls().iter().filter(|(e, _)| e == expert).count()
        }
    }

    #[async_trait]
    impl ExpertInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            expert_id: &str,
            messages: &[ChatMessage],
        ) -> Result<ExpertReply, InvokeFailure> {
            let has_images = messages.iter().any(ChatMessage::has_images);
            self.calls
                .lock()
                .unwrap()
                .push((expert_id.to_string(), has_images));
            let step = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(expert_id)
                .and_then(|q| q.pop_front())
                .unwrap_or(Step::Ok);
            match step {
                Step::Ok => Ok(ExpertReply {
                    content: format!("reply from {expert_id}"),
                    model: expert_id.to_string(),
                }),
                Step::Http(429) => Err(InvokeFailure::RateLimited { retry_after: None }),
                Step::Http(status) if status >= 500 => Err(InvokeFailure::Server {
                    status,
                    message: "boom".into(),
                }),
                Step::Http(status) => Err(InvokeFailure::Client {
                    status,
                    message: "bad request".into(),
                }),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(ExpertReply {
                        content: "too late".into(),
                        model: expert_id.to_string(),
                    })
                }
            }
        }
    }

    fn test_ids() -> ExpertIdConfig {
        ExpertIdConfig {
            default: FALLBACK.into(),
            reasoning: REASONING.into(),
            fallback: FALLBACK.into(),
            enterprise: ENTERPRISE.into(),
            math_tool: "kimi-k2:1t-cloud".into(),
            code: CODE.into(),
            aggregator: "glm-4.6:cloud".into(),
            cost_code: "minimax-m2:cloud".into(),
            vision: VISION.into(),
            vision_thinking: VISION_THINKING.into(),
        }
    }

    fn test_config() -> RouterConfig {
        RouterConfig {
            max_latency: Duration::from_millis(2_000),
            max_retries: 3,
            circuit_breaker_threshold: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_millis(5_000),
            quarantine_ttl: Duration::from_secs(60),
            endpoint: crate::config::EndpointConfig {
                base_url: "http://localhost".into(),
                api_key: None,
            },
            experts: test_ids(),
        }
    }

    fn router(invoker: Arc<dyn ExpertInvoker>) -> Router {
        Router::new(&test_config(), invoker)
    }

    fn text_request(text: &str) -> RequestContext {
        RequestContext::new("req-1", vec![ChatMessage::user(text)])
    }

    fn vision_request(text: &str) -> RequestContext {
        RequestContext::new(
            "req-1",
            vec![ChatMessage::user_with_image(text, "https://example.com/i.png")],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn primary_serves_on_first_try() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let router = router(invoker.clone());

        let routed = router.route(text_request("Hello, how are you?")).await.unwrap();
        assert_eq!(routed.served_by, FALLBACK);
        assert!(!routed.degraded);
        assert_eq!(routed.attempts.len(), 1);
        assert_eq!(routed.attempts[0].outcome, Outcome::Success);
        assert_eq!(routed.attempts[0].tries, 1);
    }

    // Scenario B: 429 twice then success within MAX_RETRIES keeps the
    // request on the original expert with no quarantine increment.
    #[tokio::test(start_paused = true)]
    async fn rate_limited_retries_then_succeeds_on_same_expert() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.script(CODE, &[Step::Http(429), Step::Http(429), Step::Ok]);
        let router = router(invoker.clone());

        let routed = router
            .route(text_request("implement a binary search tree"))
            .await
            .unwrap();

        assert_eq!(routed.served_by, CODE);
        assert_eq!(routed.attempts.len(), 1);
        assert_eq!(routed.attempts[0].tries, 3);
        assert_eq!(routed.attempts[0].outcome, Outcome::Success);
        assert_eq!(router.breaker().consecutive_failures(CODE), 0);
        assert_eq!(invoker.calls_to(CODE), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_cap_is_never_exceeded() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.script(
            CODE,
            &[Step::Http(429), Step::Http(429), Step::Http(429), Step::Http(429)],
        );
        let router = router(invoker.clone());

        let routed = router
            .route(text_request("implement a parser"))
            .await
            .unwrap();

        // Three tries on the code expert (MAX_RETRIES including the first),
        // then failover to its first backup.
        assert_eq!(invoker.calls_to(CODE), 3);
        assert_eq!(routed.attempts[0].expert_id, CODE);
        assert_eq!(routed.attempts[0].outcome, Outcome::RateLimited);
        assert_eq!(routed.attempts[0].tries, 3);
        assert_eq!(routed.served_by, "minimax-m2:cloud");
        // Retry exhaustion is one failure toward the breaker, not three.
        assert_eq!(router.breaker().consecutive_failures(CODE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_fail_over_to_backup() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.script(CODE, &[Step::Http(503), Step::Http(503), Step::Http(503)]);
        let router = router(invoker.clone());

        let routed = router
            .route(text_request("implement a lexer"))
            .await
            .unwrap();

        assert_eq!(routed.served_by, "minimax-m2:cloud");
        assert!(!routed.degraded);
        assert_eq!(routed.attempts.len(), 2);
        assert_eq!(routed.attempts[0].outcome, Outcome::ServerError);
        assert_eq!(routed.attempts[1].outcome, Outcome::Success);
        assert_eq!(
            router.metrics().snapshot().fallback_count(CODE, "minimax-m2:cloud"),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn client_error_advances_chain_without_retry() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.script(CODE, &[Step::Http(400)]);
        let router = router(invoker.clone());

        let routed = router
            .route(text_request("implement a queue"))
            .await
            .unwrap();

        assert_eq!(invoker.calls_to(CODE), 1);
        assert_eq!(routed.attempts[0].outcome, Outcome::ClientError);
        assert_eq!(routed.served_by, "minimax-m2:cloud");
    }

    // Scenario A: three timeouts across three requests quarantine the
    // expert; the fourth request skips it entirely.
    #[tokio::test(start_paused = true)]
    async fn repeated_timeouts_quarantine_the_expert() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let router = router(invoker.clone());
        let prompt = "why does this happen? think step-by-step";

        for _ in 0..3 {
            invoker.script(REASONING, &[Step::Hang]);
            let routed = router.route(text_request(prompt)).await.unwrap();
            // Timed out on the primary, served by the first backup.
            assert_eq!(routed.served_by, ENTERPRISE);
            assert_eq!(routed.attempts[0].outcome, Outcome::Timeout);
            assert_eq!(routed.attempts[0].tries, 1);
        }

        assert!(router.breaker().is_quarantined(REASONING));
        assert_eq!(router.metrics().snapshot().activation_count(REASONING), 1);

        let calls_before = invoker.calls_to(REASONING);
        let routed = router.route(text_request(prompt)).await.unwrap();
        assert_eq!(routed.served_by, ENTERPRISE);
        assert_eq!(routed.attempts.len(), 1);
        // The quarantined primary was never invoked.
        assert_eq!(invoker.calls_to(REASONING), calls_before);
        assert_eq!(
            router.metrics().snapshot().fallback_count(REASONING, ENTERPRISE),
            4
        );
    }

    // Scenario C: vision chain fully unavailable → degraded text-only
    // response via the default expert, with the image dropped.
    #[tokio::test(start_paused = true)]
    async fn exhausted_vision_chain_degrades_to_text() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.script(
            FALLBACK,
            &[Step::Http(500), Step::Http(500), Step::Http(500)],
        );
        let router = router(invoker.clone());

        // Quarantine both vision experts up front.
        for _ in 0..3 {
            router.breaker().record_outcome(VISION, Outcome::Timeout);
            router.breaker().record_outcome(VISION_THINKING, Outcome::Timeout);
        }

        let routed = router
            .route(vision_request("what is in this image?"))
            .await
            .unwrap();

        assert!(routed.degraded);
        assert_eq!(routed.served_by, FALLBACK);
        assert!(routed.warnings.iter().any(|w| w == IMAGE_DROPPED_WARNING));
        assert_eq!(router.metrics().snapshot().degraded, 1);

        // No image content was ever forwarded to the serving expert.
        let calls = invoker.calls();
        let (last_expert, last_had_images) = calls.last().unwrap();
        assert_eq!(last_expert, FALLBACK);
        assert!(!last_had_images);

        // The attempt log spans both passes: the failed text-tier attempt
        // from the vision chain plus the degraded retry.
        assert!(routed.attempts.len() >= 2);
        assert_eq!(routed.attempts.last().unwrap().outcome, Outcome::Success);
    }

    // Scenario D: unknown explicit override fails fast with no attempts.
    #[tokio::test]
    async fn unknown_override_fails_without_attempts() {
        let mut mock = MockExpertInvoker::new();
        mock.expect_invoke().never();
        let router = router(Arc::new(mock));

        let ctx = text_request("hello").with_override("no-such-model");
        let err = router.route(ctx).await.unwrap_err();
        assert!(matches!(err, RouterError::UnknownExpert(id) if id == "no-such-model"));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_text_chain_surfaces_full_attempt_log() {
        let invoker = Arc::new(ScriptedInvoker::new());
        for expert in [CODE, "minimax-m2:cloud", FALLBACK] {
            invoker.script(expert, &[Step::Http(500); 3]);
        }
        let router = router(invoker.clone());

        let err = router
            .route(text_request("implement a heap"))
            .await
            .unwrap_err();

        let RouterError::ChainExhausted { attempts } = err else {
            panic!("expected ChainExhausted");
        };
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|a| a.outcome == Outcome::ServerError));
        let tried: Vec<&str> = attempts.iter().map(|a| a.expert_id.as_str()).collect();
        assert_eq!(tried, vec![CODE, "minimax-m2:cloud", FALLBACK]);
    }

    #[tokio::test(start_paused = true)]
    async fn seen_set_deduplicates_repeated_chain_entries() {
        // A roster where the reasoning chain resolves to [r, e, r]: the
        // fallback id aliases the reasoning id.
        let ids = ExpertIdConfig {
            fallback: REASONING.into(),
            default: REASONING.into(),
            ..test_ids()
        };
        let config = RouterConfig {
            experts: ids.clone(),
            ..test_config()
        };
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.script(REASONING, &[Step::Http(500); 3]);
        invoker.script(ENTERPRISE, &[Step::Http(500); 3]);
        let router = Router::new(&config, invoker.clone());

        let err = router
            .route(text_request("why is the sky blue? explain in depth"))
            .await
            .unwrap_err();

        let RouterError::ChainExhausted { attempts } = err else {
            panic!("expected ChainExhausted");
        };
        // [reasoning, enterprise, reasoning] deduplicates to two attempts.
        assert_eq!(attempts.len(), 2);
        assert_eq!(invoker.calls_to(REASONING), 3);
        assert_eq!(invoker.calls_to(ENTERPRISE), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_failover_resets_breaker_for_serving_expert() {
        let invoker = Arc::new(ScriptedInvoker::new());
        invoker.script(CODE, &[Step::Http(503); 3]);
        let router = router(invoker.clone());

        router.route(text_request("debug my program")).await.unwrap();
        assert_eq!(router.breaker().consecutive_failures(CODE), 1);
        assert_eq!(router.breaker().consecutive_failures("minimax-m2:cloud"), 0);
    }
}
