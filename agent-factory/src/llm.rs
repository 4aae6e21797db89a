//! Claude API client and the `invoke(role, prompt)` seam.
//!
//! Every stage talks to the model through [`LlmBackend`], so the factory can
//! be driven by a scripted backend in tests. [`LlmClient`] is the production
//! implementation: one request per call to the Messages API, wrapped in the
//! transport retry policy from [`crate::retry`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::retry::{self, RetryConfig, Retryable};

/// Default Messages API endpoint.
pub const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
/// Default model.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Which stage is calling the model. Used for logging and trace files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Designer,
    Generator,
    Reviewer,
    Judge,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Designer => "designer",
            Role::Generator => "generator",
            Role::Reviewer => "reviewer",
            Role::Judge => "judge",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// No API key was configured. Reported at the first outbound call.
    #[error("no LLM API credential configured (set ANTHROPIC_API_KEY)")]
    MissingCredential,
    #[error("HTTP error calling LLM API: {0}")]
    Http(#[from] reqwest::Error),
    #[error("LLM API rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },
    #[error("LLM API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("malformed LLM response: {0}")]
    Malformed(String),
}

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            LlmError::RateLimited { .. } => true,
            LlmError::Api { status, .. } => matches!(status, 500 | 502 | 503 | 504 | 529),
            LlmError::MissingCredential | LlmError::Malformed(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// The opaque model call every stage depends on.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn invoke(&self, role: Role, system: &str, prompt: &str) -> Result<String, LlmError>;
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Response from the Messages API.
#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: Option<Usage>,
}

impl ApiResponse {
    /// Concatenated text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Claude API client.
pub struct LlmClient {
    api_key: Option<String>,
    model: String,
    endpoint: String,
    max_tokens: u32,
    retry: RetryConfig,
    http: reqwest::Client,
}

impl LlmClient {
    /// `api_key` may be absent; the error surfaces on the first call.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: DEFAULT_MODEL.to_string(),
            endpoint: ANTHROPIC_MESSAGES_URL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            retry: RetryConfig::default(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Single-turn completion with transport retries.
    pub async fn complete(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::MissingCredential)?;
        let messages = [Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        }];
        let resp = retry::with_retry(&self.retry, "LLM call", || {
            self.send_once(api_key, system, &messages)
        })
        .await?;

        if let Some(usage) = &resp.usage {
            tracing::debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                stop_reason = resp.stop_reason.as_deref().unwrap_or("-"),
                "LLM usage"
            );
        }
        Ok(resp.text())
    }

    async fn send_once(
        &self,
        api_key: &str,
        system: &str,
        messages: &[Message],
    ) -> Result<ApiResponse, LlmError> {
        let body = serde_json::json!({
            "model": &self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": messages,
        });

        let resp = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::RateLimited {
                retry_after,
                message,
            });
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let text = resp.text().await?;
        serde_json::from_str::<ApiResponse>(&text).map_err(|e| LlmError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl LlmBackend for LlmClient {
    async fn invoke(&self, role: Role, system: &str, prompt: &str) -> Result<String, LlmError> {
        tracing::debug!(%role, model = %self.model, prompt_len = prompt.len(), "LLM invoke");
        self.complete(system, prompt).await
    }
}
