//! Completion clients
//!
//! `CompletionClient` is the opaque language-model capability used by LLM
//! participants and by automatic speaker selection. `AnthropicClient` talks
//! to the Anthropic Messages API with rate-limit backoff and an
//! instance-scoped circuit breaker.

use crate::auth;
use crate::circuit_breaker::CircuitBreaker;
use crate::types::{
    AnthropicMessage, AnthropicRequest, AnthropicResponse, Completion, CompletionRequest, Model,
};
use async_trait::async_trait;
use huddle_core::{HuddleError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: usize = 4096;

// Rate limit retry configuration
const MAX_RETRIES: u32 = 5;
const INITIAL_BACKOFF_SECS: u64 = 30;
const MAX_BACKOFF_SECS: u64 = 300;
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Trait for language-model completion (allows mocking in tests)
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

/// Anthropic Messages API client
#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: Model,
    max_tokens: usize,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl AnthropicClient {
    /// Create a client with an explicit API key
    pub fn new(model: Model, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            model,
            max_tokens: DEFAULT_MAX_TOKENS,
            circuit_breaker: Arc::new(CircuitBreaker::default()),
        }
    }

    /// Create a client reading the API key from `api_key_env`
    pub fn from_env(model: Model, api_key_env: &str) -> Result<Self> {
        Ok(Self::new(model, auth::api_key_from_env(api_key_env)?))
    }

    /// Set default max tokens for responses
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    fn build_request(&self, request: &CompletionRequest) -> AnthropicRequest {
        AnthropicRequest {
            model: self.model.api_name().to_string(),
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            system: request.system.clone(),
            messages: request
                .turns
                .iter()
                .map(|turn| AnthropicMessage {
                    role: turn.role,
                    content: turn.content.clone(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    #[instrument(skip(self, request), fields(model = %self.model, turns = request.turns.len()))]
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        if !self.circuit_breaker.can_execute() {
            return Err(HuddleError::ApiLimit(format!(
                "Circuit breaker is OPEN - too many API failures. Wait {} seconds before retry.",
                self.circuit_breaker.time_until_retry().as_secs()
            )));
        }

        let body = self.build_request(request);
        let mut retries = 0;
        let mut backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            debug!("Sending request to Anthropic API (attempt {})", retries + 1);

            let response = self
                .http
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() || e.is_connect() {
                        HuddleError::Transient(format!("Failed to reach Anthropic API: {}", e))
                    } else {
                        HuddleError::Api(format!("Failed to send request: {}", e))
                    }
                })?;

            let status = response.status();

            // Rate limited: honor retry-after, otherwise back off exponentially
            if status.as_u16() == 429 {
                retries += 1;

                if retries > MAX_RETRIES {
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown".to_string());
                    return Err(HuddleError::ApiLimit(format!(
                        "Rate limit exceeded after {} retries. Last error: {}",
                        MAX_RETRIES, error_text
                    )));
                }

                let wait_secs = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(backoff_secs);

                warn!(
                    "Rate limited (429). Waiting {} seconds before retry {}/{}",
                    wait_secs, retries, MAX_RETRIES
                );

                tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                continue;
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown".to_string());

                if status.is_server_error() && retries < MAX_RETRIES {
                    retries += 1;
                    warn!(
                        "Server error ({}). Waiting {} seconds before retry {}/{}",
                        status, backoff_secs, retries, MAX_RETRIES
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }

                self.circuit_breaker.record_failure();
                tracing::error!(
                    "Circuit breaker: recorded failure (count: {})",
                    self.circuit_breaker.failure_count()
                );

                let message = format!("Anthropic API error {}: {}", status, error_text);
                return Err(if status.is_server_error() {
                    HuddleError::Transient(message)
                } else {
                    HuddleError::Api(message)
                });
            }

            let parsed: AnthropicResponse = response
                .json()
                .await
                .map_err(|e| HuddleError::Api(format!("Failed to parse response: {}", e)))?;

            let text = parsed
                .content
                .iter()
                .filter(|block| block.content_type == "text")
                .map(|block| block.text.as_str())
                .collect::<Vec<_>>()
                .join("");

            self.circuit_breaker.record_success();

            let usage = parsed
                .usage
                .map(|u| self.model.usage(u.input_tokens, u.output_tokens));

            debug!(
                "Completion received ({} chars, {} tokens)",
                text.len(),
                usage
                    .as_ref()
                    .map(|u| u.prompt_tokens + u.completion_tokens)
                    .unwrap_or(0)
            );

            return Ok(Completion { text, usage });
        }
    }
}
