pub mod parse;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::budget::Provider;
use crate::config::LlmConfig;
use crate::retry::{parse_retry_after, with_retry, RetryPolicy, RetryableError};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Text generation rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Text generation call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Text generation API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Text generation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Text generation API key not configured (set llm.api_key or AUTOFIX_LLM_API_KEY)")]
    MissingApiKey,

    #[error("Text generation returned no content")]
    EmptyResponse,
}

impl RetryableError for LlmError {
    fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } | LlmError::Timeout(_) => true,
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::Request(e) => e.is_timeout() || e.is_connect(),
            LlmError::MissingApiKey | LlmError::EmptyResponse => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    fn timed_out(after: Duration) -> Self {
        LlmError::Timeout(after)
    }
}

/// Generation parameters sent alongside every instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_output_tokens: usize,
}

impl From<&LlmConfig> for GenerationParams {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

/// The external text-generation service: instruction text in, raw text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: usize,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

const SYSTEM_PROMPT: &str = "You are an automated maintenance assistant. \
Follow the output contract in the instruction exactly and respond with JSON only.";

/// OpenAI-compatible chat-completions client.
pub struct HttpGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    provider: Provider,
    policy: RetryPolicy,
}

impl HttpGenerator {
    pub fn new(config: &LlmConfig, policy: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.api_url.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            provider: config.provider,
            policy,
        }
    }

    async fn send_once(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: params.temperature,
            max_tokens: params.max_output_tokens,
            stream: false,
        };

        let mut builder = self
            .client
            .post(&self.url)
            .header("User-Agent", "issue-autofix")
            .json(&request);
        match (&self.api_key, self.provider) {
            (Some(key), _) => builder = builder.bearer_auth(key),
            (None, Provider::Local) => {}
            (None, _) => return Err(LlmError::MissingApiKey),
        }

        let response = builder.send().await?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let text = response.text().await?;

        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited { retry_after });
        }
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: parse::truncate_str(&text, 200).to_string(),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| LlmError::Api {
            status: status.as_u16(),
            message: format!("unreadable response body: {}", e),
        })?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    #[instrument(skip_all, fields(model = %self.model, prompt_chars = prompt.len()))]
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, LlmError> {
        let content = with_retry(&self.policy, "text generation", || {
            self.send_once(prompt, params)
        })
        .await?;
        debug!(response_chars = content.len(), "received generation");
        Ok(content)
    }
}
