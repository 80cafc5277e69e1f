use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relaybot_core::config::{LlmConfig, LlmProvider};
use relaybot_core::{GenerationError, Message};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::providers::{AnthropicClient, OllamaClient, OpenAiClient};

/// The reply-generation collaborator: given the full transcript, produce the
/// assistant's next message.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, history: &[Message]) -> Result<String, GenerationError>;
}

const MAX_ERROR_BODY_CHARS: usize = 512;
const RETRY_BASE_DELAY_MS: u64 = 500;
const RETRY_MAX_DELAY_MS: u64 = 8_000;

#[derive(Clone, Debug)]
pub(crate) struct HttpSettings {
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl HttpSettings {
    pub(crate) fn from_config(config: &LlmConfig) -> Self {
        Self { timeout_secs: config.timeout_secs, max_retries: config.max_retries }
    }
}

pub fn build_generator(config: &LlmConfig) -> Result<Arc<dyn ReplyGenerator>, GenerationError> {
    let client = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|error| GenerationError::Unconfigured(format!("http client: {error}")))?;

    let generator: Arc<dyn ReplyGenerator> = match config.provider {
        LlmProvider::OpenAi => Arc::new(OpenAiClient::from_config(client, config)?),
        LlmProvider::Anthropic => Arc::new(AnthropicClient::from_config(client, config)?),
        LlmProvider::Ollama => Arc::new(OllamaClient::from_config(client, config)),
    };
    Ok(generator)
}

/// Sends the request built by `build`, retrying retryable failures with
/// capped exponential backoff.
pub(crate) async fn send_with_retries<T, F>(
    provider: &'static str,
    settings: &HttpSettings,
    build: F,
) -> Result<T, GenerationError>
where
    T: DeserializeOwned,
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        match send_once(build(), settings.timeout_secs).await {
            Ok(parsed) => return Ok(parsed),
            Err(error) if error.is_retryable() && attempt < settings.max_retries => {
                let delay = retry_delay(attempt, &error);
                warn!(
                    event_name = "agent.llm.retry",
                    provider,
                    attempt,
                    max_retries = settings.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "llm request failed; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

async fn send_once<T>(request: RequestBuilder, timeout_secs: u64) -> Result<T, GenerationError>
where
    T: DeserializeOwned,
{
    let response = request.send().await.map_err(|error| {
        if error.is_timeout() {
            GenerationError::Timeout { timeout_secs }
        } else {
            GenerationError::Transport(error.to_string())
        }
    })?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        return Err(GenerationError::RateLimited { retry_after_secs });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GenerationError::Http {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        });
    }

    response.json::<T>().await.map_err(|error| {
        if error.is_timeout() {
            GenerationError::Timeout { timeout_secs }
        } else {
            GenerationError::Decode(error.to_string())
        }
    })
}

fn retry_delay(attempt: u32, error: &GenerationError) -> Duration {
    if let GenerationError::RateLimited { retry_after_secs: Some(secs) } = error {
        return Duration::from_secs(*secs).min(Duration::from_millis(RETRY_MAX_DELAY_MS));
    }

    let multiplier = 1_u64 << attempt.min(16);
    Duration::from_millis(RETRY_BASE_DELAY_MS.saturating_mul(multiplier).min(RETRY_MAX_DELAY_MS))
}

/// Rejects a blank completion so callers never append an empty assistant turn.
pub(crate) fn non_empty_reply(text: Option<String>) -> Result<String, GenerationError> {
    match text.map(|text| text.trim().to_owned()) {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(GenerationError::EmptyResponse),
    }
}
