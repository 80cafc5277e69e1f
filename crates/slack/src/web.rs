use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::blocks::Block;
use crate::events::OutgoingMessage;

pub const SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PostError {
    #[error("slack web api request failed: {0}")]
    Transport(String),
    #[error("slack web api returned HTTP {0}")]
    Http(u16),
    #[error("slack web api rejected {method}: {error}")]
    Api { method: &'static str, error: String },
}

/// Delivers rendered replies back to Slack.
#[async_trait]
pub trait ReplyPoster: Send + Sync {
    async fn post(&self, outgoing: &OutgoingMessage) -> Result<(), PostError>;
}

#[derive(Default)]
pub struct NoopReplyPoster;

#[async_trait]
impl ReplyPoster for NoopReplyPoster {
    async fn post(&self, outgoing: &OutgoingMessage) -> Result<(), PostError> {
        debug!(
            event_name = "egress.slack.post_skipped",
            channel_id = %outgoing.channel_id,
            "noop poster dropped outgoing message"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
    blocks: &'a [Block],
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    error: Option<String>,
}

pub struct SlackWebClient {
    client: Client,
    bot_token: SecretString,
    api_base: String,
}

impl SlackWebClient {
    pub fn new(bot_token: SecretString, timeout: Duration) -> Result<Self, PostError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| PostError::Transport(error.to_string()))?;
        Ok(Self { client, bot_token, api_base: SLACK_API_BASE.to_owned() })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_owned();
        self
    }

    async fn call(&self, method: &'static str, body: &PostMessageRequest<'_>) -> Result<(), PostError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.api_base))
            .bearer_auth(self.bot_token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|error| PostError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PostError::Http(status.as_u16()));
        }

        let parsed: ApiResponse =
            response.json().await.map_err(|error| PostError::Transport(error.to_string()))?;
        if parsed.ok {
            Ok(())
        } else {
            Err(PostError::Api {
                method,
                error: parsed.error.unwrap_or_else(|| "unknown_error".to_owned()),
            })
        }
    }
}

#[async_trait]
impl ReplyPoster for SlackWebClient {
    async fn post(&self, outgoing: &OutgoingMessage) -> Result<(), PostError> {
        let body = PostMessageRequest {
            channel: &outgoing.channel_id,
            text: &outgoing.message.fallback_text,
            blocks: &outgoing.message.blocks,
            thread_ts: outgoing.thread_ts.as_deref(),
            user: outgoing.ephemeral_user.as_deref(),
        };
        let method =
            if outgoing.ephemeral_user.is_some() { "chat.postEphemeral" } else { "chat.postMessage" };

        self.call(method, &body).await
    }
}
