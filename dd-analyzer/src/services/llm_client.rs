//! LLM client for OpenAI-compatible chat-completions endpoints
//!
//! The pipeline talks to the model through the `LlmProvider` trait so that
//! tests can substitute a scripted provider.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use dd_common::config::LlmConfig;

/// LLM call error
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Network(String),

    #[error("LLM rate limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("LLM API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("LLM authentication failed")]
    Authentication,

    #[error("Unparseable LLM response: {0}")]
    InvalidResponse(String),

    #[error("LLM client configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Network(_) | LlmError::RateLimited { .. } => true,
            LlmError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Provider-independent completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: f32,
    /// Ask the endpoint for a JSON object response
    pub json_mode: bool,
    /// Pipeline stage or feature issuing the call (logging only)
    pub purpose: String,
}

impl CompletionRequest {
    /// System + user prompt expecting a JSON answer
    pub fn json(purpose: &str, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            max_tokens: None,
            temperature: 0.0,
            json_mode: true,
            purpose: purpose.to_string(),
        }
    }

    /// Concatenated prompt text
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
    pub duration: Duration,
}

/// Chat-completion backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Provider/model name for logs and health output
    fn name(&self) -> &str;
}

// ============================================================================
// OpenAI-compatible HTTP client
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionReply {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ChatReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorReply {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Client for any endpoint implementing `POST {base_url}/chat/completions`
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    default_max_tokens: u32,
    max_retries: u32,
    rate_limiter: DirectRateLimiter,
    name: String,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(dd_common::config::get_user_agent())
            .build()
            .map_err(|e| LlmError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let per_minute = NonZeroU32::new(config.requests_per_minute)
            .ok_or_else(|| LlmError::Config("requests_per_minute must be > 0".to_string()))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            default_max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            rate_limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            name: format!("openai-compatible:{}", config.model),
        })
    }

    async fn send_once(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.rate_limiter.until_ready().await;

        let body = ChatCompletionBody {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens.unwrap_or(self.default_max_tokens),
            temperature: request.temperature,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let started = Instant::now();
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(LlmError::RateLimited { retry_after_secs });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LlmError::Authentication);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorReply>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let reply: ChatCompletionReply = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

        let usage = reply
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content,
            model: reply.model.unwrap_or_else(|| self.model.clone()),
            usage,
            duration: started.elapsed(),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let attempts = self.max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.send_once(&request).await {
                Ok(response) => {
                    debug!(
                        purpose = %request.purpose,
                        attempt,
                        prompt_tokens = response.usage.prompt_tokens,
                        completion_tokens = response.usage.completion_tokens,
                        duration_ms = response.duration.as_millis() as u64,
                        "LLM call completed"
                    );
                    return Ok(response);
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let backoff = match &err {
                        LlmError::RateLimited { retry_after_secs } => {
                            Duration::from_secs(*retry_after_secs)
                        }
                        _ => Duration::from_millis(500 * 2u64.pow(attempt - 1)),
                    };
                    warn!(
                        purpose = %request.purpose,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "LLM call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Response parsing
// ============================================================================

/// Parse JSON out of model output
///
/// Accepts bare JSON, ```json fenced blocks and JSON preceded or followed by
/// prose.
pub fn parse_json_response<T: DeserializeOwned>(content: &str) -> Result<T, LlmError> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let unfenced = strip_code_fence(trimmed);
    if let Ok(value) = serde_json::from_str(unfenced) {
        return Ok(value);
    }

    let candidate = extract_json_span(unfenced)
        .ok_or_else(|| LlmError::InvalidResponse(format!("No JSON found in: {}", preview(content))))?;

    serde_json::from_str(candidate)
        .map_err(|e| LlmError::InvalidResponse(format!("{} in: {}", e, preview(content))))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(start) = text.find("```") else {
        return text;
    };
    let after = &text[start + 3..];
    // Skip the language tag line
    let body = match after.find('\n') {
        Some(newline) => &after[newline + 1..],
        None => after,
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Outermost `{...}` or `[...]` span, whichever opens first
fn extract_json_span(text: &str) -> Option<&str> {
    let open = text.find(['{', '['])?;
    let close_char = if text[open..].starts_with('{') { '}' } else { ']' };
    let close = text.rfind(close_char)?;
    (close > open).then(|| &text[open..=close])
}

fn preview(content: &str) -> String {
    content.chars().take(200).collect()
}
