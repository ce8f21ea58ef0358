//! Expert invocation seam and the HTTP implementation.
//!
//! The orchestrator only sees [`ExpertInvoker`]: one call in, either a
//! successful reply or a classified failure out. The production
//! implementation posts an Ollama/OpenAI-compatible chat payload; tests
//! substitute mocks or scripted invokers behind the same trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::EndpointConfig;
use crate::types::{ChatMessage, Outcome};

/// Successful payload from an expert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertReply {
    /// Generated assistant content.
    pub content: String,
    /// Model that actually served the call (may differ from requested).
    pub model: String,
}

/// Classified failure from one invocation.
///
/// `Network` covers transport-level errors (DNS, refused connection, broken
/// stream); they are treated as the server-error class for retry and breaker
/// purposes. Deadline expiry is not represented here — the latency monitor
/// cancels the call before a failure is ever produced.
#[derive(Debug, Error)]
pub enum InvokeFailure {
    #[error("rate limited (HTTP 429)")]
    RateLimited {
        /// Parsed `Retry-After` header, seconds.
        retry_after: Option<f64>,
    },
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },
    #[error("client error (HTTP {status}): {message}")]
    Client { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
}

impl InvokeFailure {
    /// Map the failure into the attempt-outcome taxonomy.
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::RateLimited { .. } => Outcome::RateLimited,
            Self::Server { .. } | Self::Network(_) => Outcome::ServerError,
            Self::Client { .. } => Outcome::ClientError,
        }
    }
}

/// Abstract capability to invoke one expert with a chat payload.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExpertInvoker: Send + Sync {
    async fn invoke(
        &self,
        expert_id: &str,
        messages: &[ChatMessage],
    ) -> Result<ExpertReply, InvokeFailure>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: ChatResponseMessage,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

/// HTTP invoker against an Ollama-compatible `/api/chat` endpoint.
pub struct HttpInvoker {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpInvoker {
    /// Build the invoker. No overall request timeout is set on the client:
    /// the per-attempt deadline belongs to the latency monitor, which drops
    /// the in-flight future on expiry.
    pub fn new(config: &EndpointConfig) -> Result<Self, InvokeFailure> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| InvokeFailure::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ExpertInvoker for HttpInvoker {
    async fn invoke(
        &self,
        expert_id: &str,
        messages: &[ChatMessage],
    ) -> Result<ExpertReply, InvokeFailure> {
        let url = format!("{}/api/chat", self.base_url);
        let payload = ChatRequest {
            model: expert_id,
            messages,
            stream: false,
        };

        let mut request = self.client.post(&url).json(&payload);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| InvokeFailure::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<f64>().ok());
            return Err(InvokeFailure::RateLimited { retry_after });
        }
        if status.is_server_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(InvokeFailure::Server {
                status: status.as_u16(),
                message,
            });
        }
        if status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(InvokeFailure::Client {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response.json().await.map_err(|e| InvokeFailure::Server {
            status: status.as_u16(),
            message: format!("unparseable response body: {e}"),
        })?;

        debug!(expert = expert_id, "expert call succeeded");
        Ok(ExpertReply {
            content: body.message.content,
            model: body.model.unwrap_or_else(|| expert_id.to_string()),
        })
    }
}
