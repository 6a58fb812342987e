//! Optional LLM summaries for digest posts.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use tradewatch_core::{CoreError, ErrorExt, LlmError, RawPost, SummarizerSettings};

const PROVIDER: &str = "openai";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

pub trait Summarizer {
    async fn summarize(&self, post: &RawPost) -> Result<String, CoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Chat-completions client, one request per post.
pub struct OpenAiSummarizer {
    client: Client,
    settings: SummarizerSettings,
    retry_delay: Duration,
}

impl OpenAiSummarizer {
    pub fn new(settings: SummarizerSettings) -> Result<Self, CoreError> {
        if settings.api_key.trim().is_empty() {
            return Err(LlmError::InvalidApiKey {
                provider: PROVIDER.to_string(),
            }
            .into());
        }

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            settings,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    fn build_prompt(&self, post: &RawPost) -> String {
        format!(
            "{}\n\nPost Title: {}\nPost Content:\n{}",
            self.settings.prompt, post.title, post.content_text
        )
    }

    async fn request_once(&self, post: &RawPost) -> Result<String, CoreError> {
        let request = ChatRequest {
            model: &self.settings.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: self.build_prompt(post),
            }],
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };

        let response = self
            .client
            .post(&self.settings.endpoint)
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::from(LlmError::RequestTimeout {
                        provider: PROVIDER.to_string(),
                    })
                } else {
                    CoreError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let provider = PROVIDER.to_string();
            let error = match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    LlmError::InvalidApiKey { provider }
                }
                StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimitExceeded { provider },
                s if s.is_server_error() => LlmError::ServiceUnavailable {
                    provider,
                    status_code: s.as_u16(),
                },
                s => LlmError::RequestRejected {
                    provider,
                    status_code: s.as_u16(),
                },
            };
            return Err(error.into());
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            debug!("Unparsable completion body: {}", e);
            LlmError::InvalidResponseFormat {
                provider: PROVIDER.to_string(),
            }
        })?;

        let summary = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .unwrap_or_default();

        if summary.is_empty() {
            return Err(LlmError::EmptyCompletion {
                provider: PROVIDER.to_string(),
            }
            .into());
        }

        Ok(summary)
    }
}

impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, post: &RawPost) -> Result<String, CoreError> {
        let max_attempts = self.settings.max_retries.max(1);
        let mut attempt = 1;

        loop {
            match self.request_once(post).await {
                Ok(summary) => {
                    if attempt > 1 {
                        info!(
                            "Summary for {} succeeded on attempt {}",
                            post.external_id, attempt
                        );
                    }
                    return Ok(summary);
                }
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry_delay * attempt;
                    warn!(
                        "Summary attempt {} for {} failed, retrying in {:?}: {}",
                        attempt, post.external_id, delay, error
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
