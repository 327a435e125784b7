//! OpenAI-compatible inference client.
//!
//! Sends chat completion requests to the provider endpoint and streams back
//! tokens, reasoning deltas, and tool calls.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client as HttpClient;

use super::config::ModelConfig;
use super::errors::InferenceError;
use super::streaming::parse_sse_stream;
use super::types::{ChatCompletionRequest, StreamChunk};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── ModelClient trait ───────────────────────────────────────────────────────

/// Boxed chunk stream returned by a model backend.
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, InferenceError>> + Send>>;

/// The seam between the conversation engine and the model provider.
///
/// The engine drives everything through this trait, so tests can substitute
/// a scripted backend and exercise the full phase machine without a network.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send a chat completion request and stream the response.
    async fn stream_chat(&self, request: ChatCompletionRequest) -> Result<ModelStream, InferenceError>;
}

// ─── OpenAiClient ────────────────────────────────────────────────────────────

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct OpenAiClient {
    http: HttpClient,
    config: ModelConfig,
}

impl OpenAiClient {
    /// Create a client from the model configuration.
    ///
    /// Does NOT check connectivity — that happens on the first request.
    pub fn new(config: ModelConfig) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, config })
    }

    /// The base URL of the configured endpoint.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// The model name sent in request bodies.
    pub fn model_name(&self) -> &str {
        &self.config.model_name
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn stream_chat(&self, request: ChatCompletionRequest) -> Result<ModelStream, InferenceError> {
        let url = format!("{}/chat/completions", self.config.base_url);

        // Log the request metadata (not the full body — it can be huge)
        tracing::info!(
            url = %url,
            model = %request.model,
            message_count = request.messages.len(),
            has_tools = request.tools.is_some(),
            max_tokens = request.max_tokens,
            "model request"
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout {
                        duration_secs: self.config.request_timeout_secs,
                    }
                } else {
                    InferenceError::ConnectionFailed {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        Ok(Box::pin(parse_sse_stream(response)))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
