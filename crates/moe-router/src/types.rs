//! Shared request/response types for the routing core.
//!
//! A `RequestContext` is built once per inbound request and is read-only for
//! the rest of the request's lifetime; the orchestrator owns it. The message
//! shape mirrors the OpenAI-style chat payload: content is either a plain
//! string or a list of typed parts (text / image_url) for multimodal input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classified result of a single expert invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The expert returned a usable response.
    Success,
    /// The attempt exceeded the per-attempt deadline and was cancelled.
    Timeout,
    /// HTTP 429 — and retries on the same expert were exhausted.
    RateLimited,
    /// HTTP 5xx or a transport-level failure.
    ServerError,
    /// Non-429 4xx. Not retried, but still advances the chain.
    ClientError,
}

impl Outcome {
    /// Whether this outcome counts toward the circuit breaker.
    ///
    /// All non-success outcomes count, including `ClientError` — a 4xx may
    /// indicate a malformed request rather than an unhealthy expert, but the
    /// uniform treatment is deliberate and matches the breaker contract.
    pub fn is_failure(self) -> bool {
        self != Self::Success
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::ServerError => write!(f, "server_error"),
            Self::ClientError => write!(f, "client_error"),
        }
    }
}

/// One expert invocation slot within a request, with its final outcome.
///
/// Retries on the same expert collapse into a single record (`tries` counts
/// the HTTP calls made, including the first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Expert that was attempted.
    pub expert_id: String,
    /// Wall-clock time the attempt slot started.
    pub started_at: DateTime<Utc>,
    /// Final classified outcome of the slot.
    pub outcome: Outcome,
    /// Total latency of the slot in milliseconds (all tries + backoff).
    pub latency_ms: u64,
    /// Number of calls issued within the slot (1 + retries).
    pub tries: u32,
}

/// Image reference inside a multimodal content part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// A single typed part of a multimodal message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Message content: plain text or a list of multimodal parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// Chat message in the wire payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: MessageContent::Text(content.into()),
        }
    }

    /// User message with text plus an attached image.
    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_url.into(),
                    },
                },
            ]),
        }
    }

    /// Whether this message carries any image parts.
    pub fn has_images(&self) -> bool {
        match &self.content {
            MessageContent::Text(_) => false,
            MessageContent::Parts(parts) => parts
                .iter()
                .any(|p| matches!(p, ContentPart::ImageUrl { .. })),
        }
    }
}

/// Classification-relevant view of one inbound request.
///
/// Created once per request; read-only after creation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Caller-supplied request id for log correlation.
    pub request_id: String,
    /// Full conversation payload forwarded to the serving expert.
    pub messages: Vec<ChatMessage>,
    /// Explicit expert override from the request, if any.
    pub model_override: Option<String>,
    /// Arrival timestamp.
    pub arrived_at: DateTime<Utc>,
    /// Caller-visible warnings accumulated on this request (e.g. degradation).
    pub warnings: Vec<String>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            request_id: request_id.into(),
            messages,
            model_override: None,
            arrived_at: Utc::now(),
            warnings: Vec::new(),
        }
    }

    pub fn with_override(mut self, expert_id: impl Into<String>) -> Self {
        self.model_override = Some(expert_id.into());
        self
    }

    /// Extract the routing features: the last user message's text and whether
    /// it carries image content. Scans messages newest-first and stops at the
    /// first user message, matching how the routing decision is made.
    pub fn routing_features(&self) -> (String, bool) {
        for msg in self.messages.iter().rev() {
            if msg.role != "user" {
                continue;
            }
            return match &msg.content {
                MessageContent::Text(text) => (text.clone(), false),
                MessageContent::Parts(parts) => {
                    let mut text = String::new();
                    let mut has_images = false;
                    for part in parts {
                        match part {
                            ContentPart::Text { text: t } => text = t.clone(),
                            ContentPart::ImageUrl { .. } => has_images = true,
                        }
                    }
                    (text, has_images)
                }
            };
        }
        (String::new(), false)
    }

    /// Whether any message in the payload carries image content.
    pub fn has_images(&self) -> bool {
        self.messages.iter().any(ChatMessage::has_images)
    }
}
