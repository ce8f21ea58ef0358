//! Environment-driven router configuration.
//!
//! Every knob has a built-in default and an environment-variable override.
//!
//! ## Recognized variables
//!
//! | Variable                    | Default | Meaning                                   |
//! |-----------------------------|---------|-------------------------------------------|
//! | `MAX_LATENCY_MS`            | 2000    | Per-attempt deadline                      |
//! | `MAX_RETRIES`               | 3       | Max tries per expert, including the first |
//! | `CIRCUIT_BREAKER_THRESHOLD` | 3       | Consecutive failures before quarantine    |
//! | `RETRY_BASE_DELAY_MS`       | 500     | First backoff delay                       |
//! | `RETRY_MAX_DELAY_MS`        | 5000    | Backoff cap                               |
//! | `QUARANTINE_TTL_SECS`       | 60      | How long a quarantine lasts               |
//! | `OLLAMA_BASE_URL`           | https://api.ollama.cloud | Backend API base     |
//! | `OLLAMA_API_KEY`            | (none)  | Bearer token for the backend              |
//!
//! Per-use-case expert ids are overridable via `DEFAULT_MODEL`,
//! `REASONING_MODEL`, `FALLBACK_MODEL`, `ENTERPRISE_MODEL`, `MATH_TOOL_MODEL`,
//! `CODE_MODEL`, `AGGREGATOR_MODEL`, `COST_CODE_MODEL`, `VISION_MODEL`, and
//! `VISION_THINKING_MODEL`.

use std::env;
use std::time::Duration;

const ENV_MAX_LATENCY_MS: &str = "MAX_LATENCY_MS";
const ENV_MAX_RETRIES: &str = "MAX_RETRIES";
const ENV_CIRCUIT_BREAKER_THRESHOLD: &str = "CIRCUIT_BREAKER_THRESHOLD";
const ENV_RETRY_BASE_DELAY_MS: &str = "RETRY_BASE_DELAY_MS";
const ENV_RETRY_MAX_DELAY_MS: &str = "RETRY_MAX_DELAY_MS";
const ENV_QUARANTINE_TTL_SECS: &str = "QUARANTINE_TTL_SECS";
const ENV_BASE_URL: &str = "OLLAMA_BASE_URL";
const ENV_API_KEY: &str = "OLLAMA_API_KEY";

/// Per-attempt deadline in milliseconds.
const DEFAULT_MAX_LATENCY_MS: u64 = 2_000;
/// Max tries per expert within one attempt slot, including the first.
const DEFAULT_MAX_RETRIES: u32 = 3;
/// Consecutive failures before an expert is quarantined.
const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;
const DEFAULT_QUARANTINE_TTL_SECS: u64 = 60;
const DEFAULT_BASE_URL: &str = "https://api.ollama.cloud";

fn env_u64(var: &str, default: u64) -> u64 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(var: &str, default: u32) -> u32 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(var: &str, default: &str) -> String {
    env::var(var).unwrap_or_else(|_| default.to_string())
}

/// Backend endpoint configuration for the HTTP invoker.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Base URL of the OpenAI/Ollama-compatible API.
    pub base_url: String,
    /// Optional bearer token; local endpoints typically need none.
    pub api_key: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: env_string(ENV_BASE_URL, DEFAULT_BASE_URL),
            api_key: env::var(ENV_API_KEY).ok().filter(|k| !k.is_empty()),
        }
    }
}

/// Per-use-case expert id assignment.
///
/// Defaults are the Ollama Cloud roster; each id is independently
/// overridable via its environment variable.
#[derive(Debug, Clone)]
pub struct ExpertIdConfig {
    /// Generic low-latency expert serving unmatched traffic.
    pub default: String,
    /// Long-form / step-by-step reasoning.
    pub reasoning: String,
    /// Low-latency fallback appearing in most backup chains.
    pub fallback: String,
    /// Production-grade multi-turn reasoning.
    pub enterprise: String,
    /// Math, tool-calling, and agentic workflows.
    pub math_tool: String,
    /// Advanced code generation and debugging.
    pub code: String,
    /// Multi-expert synthesis / summarization.
    pub aggregator: String,
    /// Cost-effective code generation for simple tasks.
    pub cost_code: String,
    /// Plain visual understanding.
    pub vision: String,
    /// Visual understanding with reasoning.
    pub vision_thinking: String,
}

impl Default for ExpertIdConfig {
    fn default() -> Self {
        Self {
            default: env_string("DEFAULT_MODEL", "gpt-oss:20b-cloud"),
            reasoning: env_string("REASONING_MODEL", "deepseek-v3.1:671b-cloud"),
            fallback: env_string("FALLBACK_MODEL", "gpt-oss:20b-cloud"),
            enterprise: env_string("ENTERPRISE_MODEL", "gpt-oss:120b-cloud"),
            math_tool: env_string("MATH_TOOL_MODEL", "kimi-k2:1t-cloud"),
            code: env_string("CODE_MODEL", "qwen3-coder:480b-cloud"),
            aggregator: env_string("AGGREGATOR_MODEL", "glm-4.6:cloud"),
            cost_code: env_string("COST_CODE_MODEL", "minimax-m2:cloud"),
            vision: env_string("VISION_MODEL", "qwen3-vl:235b-cloud"),
            vision_thinking: env_string("VISION_THINKING_MODEL", "qwen3-vl:235b-instruct-cloud"),
        }
    }
}

/// Top-level router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Per-attempt deadline enforced by the latency monitor.
    pub max_latency: Duration,
    /// Max tries per expert within one attempt slot, including the first.
    pub max_retries: u32,
    /// Consecutive failures before quarantine.
    pub circuit_breaker_threshold: u32,
    /// First retry backoff delay; doubles each retry.
    pub retry_base_delay: Duration,
    /// Backoff cap.
    pub retry_max_delay: Duration,
    /// Quarantine duration before an expert becomes eligible again.
    pub quarantine_ttl: Duration,
    /// Backend endpoint settings.
    pub endpoint: EndpointConfig,
    /// Expert id roster.
    pub experts: ExpertIdConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_latency: Duration::from_millis(env_u64(
                ENV_MAX_LATENCY_MS,
                DEFAULT_MAX_LATENCY_MS,
            )),
            max_retries: env_u32(ENV_MAX_RETRIES, DEFAULT_MAX_RETRIES),
            circuit_breaker_threshold: env_u32(
                ENV_CIRCUIT_BREAKER_THRESHOLD,
                DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            ),
            retry_base_delay: Duration::from_millis(env_u64(
                ENV_RETRY_BASE_DELAY_MS,
                DEFAULT_RETRY_BASE_DELAY_MS,
            )),
            retry_max_delay: Duration::from_millis(env_u64(
                ENV_RETRY_MAX_DELAY_MS,
                DEFAULT_RETRY_MAX_DELAY_MS,
            )),
            quarantine_ttl: Duration::from_secs(env_u64(
                ENV_QUARANTINE_TTL_SECS,
                DEFAULT_QUARANTINE_TTL_SECS,
            )),
            endpoint: EndpointConfig::default(),
            experts: ExpertIdConfig::default(),
        }
    }
}
