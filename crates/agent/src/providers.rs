use async_trait::async_trait;
use relaybot_core::config::LlmConfig;
use relaybot_core::{GenerationError, Message, Role};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::llm::{non_empty_reply, send_with_retries, HttpSettings, ReplyGenerator};

const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com";
const ANTHROPIC_DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const OLLAMA_DEFAULT_BASE_URL: &str = "http://localhost:11434";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone, Debug, PartialEq, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

fn base_url(config: &LlmConfig, default: &str) -> String {
    config.base_url.as_deref().unwrap_or(default).trim_end_matches('/').to_owned()
}

fn required_api_key(config: &LlmConfig, provider: &str) -> Result<SecretString, GenerationError> {
    config
        .api_key
        .clone()
        .filter(|key| !key.expose_secret().trim().is_empty())
        .ok_or_else(|| GenerationError::Unconfigured(format!("{provider} requires llm.api_key")))
}

pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    temperature: f32,
    http: HttpSettings,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn from_config(client: Client, config: &LlmConfig) -> Result<Self, GenerationError> {
        Ok(Self {
            client,
            base_url: base_url(config, OPENAI_DEFAULT_BASE_URL),
            api_key: required_api_key(config, "openai")?,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            http: HttpSettings::from_config(config),
        })
    }

    fn request_body<'a>(&'a self, history: &'a [Message]) -> OpenAiRequest<'a> {
        OpenAiRequest {
            model: &self.model,
            messages: history
                .iter()
                .map(|message| WireMessage { role: message.role.as_str(), content: &message.content })
                .collect(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl ReplyGenerator for OpenAiClient {
    async fn generate(&self, history: &[Message]) -> Result<String, GenerationError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.request_body(history);

        let response: OpenAiResponse = send_with_retries("openai", &self.http, || {
            self.client.post(&url).bearer_auth(self.api_key.expose_secret()).json(&body)
        })
        .await?;

        non_empty_reply(response.choices.into_iter().next().and_then(|choice| choice.message.content))
    }
}

pub struct AnthropicClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    temperature: f32,
    http: HttpSettings,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, PartialEq, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicClient {
    pub fn from_config(client: Client, config: &LlmConfig) -> Result<Self, GenerationError> {
        Ok(Self {
            client,
            base_url: base_url(config, ANTHROPIC_DEFAULT_BASE_URL),
            api_key: required_api_key(config, "anthropic")?,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            http: HttpSettings::from_config(config),
        })
    }

    fn request_body<'a>(&'a self, history: &[Message]) -> AnthropicRequest<'a> {
        let (system, messages) = split_system_prompt(history);
        AnthropicRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system,
            messages,
        }
    }
}

/// The messages API takes the system prompt as a top-level field and expects
/// user/assistant turns to alternate, so consecutive same-role turns (possible
/// when two events for one user interleave) are merged.
fn split_system_prompt(history: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
    let system = history
        .iter()
        .filter(|message| message.is_system())
        .map(|message| message.content.as_str())
        .collect::<Vec<_>>();
    let system = (!system.is_empty()).then(|| system.join("\n\n"));

    let mut messages: Vec<AnthropicMessage> = Vec::new();
    for message in history.iter().filter(|message| !message.is_system()) {
        let role = if message.role == Role::Assistant { "assistant" } else { "user" };
        match messages.last_mut() {
            Some(previous) if previous.role == role => {
                previous.content.push_str("\n\n");
                previous.content.push_str(&message.content);
            }
            _ => messages.push(AnthropicMessage { role, content: message.content.clone() }),
        }
    }

    (system, messages)
}

#[async_trait]
impl ReplyGenerator for AnthropicClient {
    async fn generate(&self, history: &[Message]) -> Result<String, GenerationError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.request_body(history);

        let response: AnthropicResponse = send_with_retries("anthropic", &self.http, || {
            self.client
                .post(&url)
                .header("x-api-key", self.api_key.expose_secret())
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
        })
        .await?;

        let text = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        non_empty_reply(Some(text))
    }
}

pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    http: HttpSettings,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: Option<OllamaMessage>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

impl OllamaClient {
    pub fn from_config(client: Client, config: &LlmConfig) -> Self {
        Self {
            client,
            base_url: base_url(config, OLLAMA_DEFAULT_BASE_URL),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            http: HttpSettings::from_config(config),
        }
    }
}

#[async_trait]
impl ReplyGenerator for OllamaClient {
    async fn generate(&self, history: &[Message]) -> Result<String, GenerationError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = OllamaRequest {
            model: &self.model,
            messages: history
                .iter()
                .map(|message| WireMessage { role: message.role.as_str(), content: &message.content })
                .collect(),
            stream: false,
            options: OllamaOptions { temperature: self.temperature, num_predict: self.max_tokens },
        };

        let response: OllamaResponse =
            send_with_retries("ollama", &self.http, || self.client.post(&url).json(&body)).await?;

        non_empty_reply(response.message.map(|message| message.content))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::{http::StatusCode, routing::post, Json, Router};
    use relaybot_core::config::{AppConfig, LlmConfig, LlmProvider};
    use relaybot_core::{GenerationError, Message};
    use reqwest::Client;
    use serde_json::{json, Value};

    use super::{split_system_prompt, AnthropicClient, OpenAiClient};
    use crate::llm::ReplyGenerator;

    fn llm_config(provider: LlmProvider, base_url: Option<String>) -> LlmConfig {
        let mut config = AppConfig::default().llm;
        config.provider = provider;
        config.base_url = base_url;
        config.api_key = Some("sk-test".to_owned().into());
        config.max_retries = 1;
        config.timeout_secs = 5;
        config
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{address}")
    }

    #[test]
    fn anthropic_payload_lifts_system_prompt_and_merges_turns() {
        let history = vec![
            Message::system("Be brief."),
            Message::user("first"),
            Message::user("second"),
            Message::assistant("answer"),
        ];

        let (system, messages) = split_system_prompt(&history);

        assert_eq!(system.as_deref(), Some("Be brief."));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].content, "first\n\nsecond");
        assert_eq!(messages[1].role, "assistant");
    }

    #[test]
    fn openai_payload_keeps_roles_in_order() {
        let config = llm_config(LlmProvider::OpenAi, None);
        let client = OpenAiClient::from_config(Client::new(), &config).expect("client");
        let history = vec![Message::system("sys"), Message::user("hi")];

        let body = serde_json::to_value(client.request_body(&history)).expect("serialize");

        assert_eq!(body["messages"][0], json!({"role": "system", "content": "sys"}));
        assert_eq!(body["messages"][1], json!({"role": "user", "content": "hi"}));
        assert_eq!(body["model"], "gpt-4o-mini");
    }

    #[test]
    fn missing_api_key_is_unconfigured() {
        let mut config = llm_config(LlmProvider::Anthropic, None);
        config.api_key = None;

        let result = AnthropicClient::from_config(Client::new(), &config);

        assert!(matches!(result, Err(GenerationError::Unconfigured(_))));
    }

    #[tokio::test]
    async fn openai_client_retries_server_errors_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler_calls = calls.clone();
        let router = Router::new().route(
            "/v1/chat/completions",
            post(move |Json(_body): Json<Value>| {
                let calls = handler_calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "busy"})))
                    } else {
                        (
                            StatusCode::OK,
                            Json(json!({"choices": [{"message": {"content": "Hello back!"}}]})),
                        )
                    }
                }
            }),
        );
        let base_url = serve(router).await;
        let config = llm_config(LlmProvider::OpenAi, Some(base_url));
        let client = OpenAiClient::from_config(Client::new(), &config).expect("client");

        let reply = client.generate(&[Message::user("hello")]).await.expect("reply");

        assert_eq!(reply, "Hello back!");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn openai_client_does_not_retry_client_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler_calls = calls.clone();
        let router = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let calls = handler_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::UNAUTHORIZED, "bad key")
                }
            }),
        );
        let base_url = serve(router).await;
        let config = llm_config(LlmProvider::OpenAi, Some(base_url));
        let client = OpenAiClient::from_config(Client::new(), &config).expect("client");

        let error = client.generate(&[Message::user("hello")]).await.expect_err("should fail");

        assert_eq!(error, GenerationError::Http { status: 401, body: "bad key".to_owned() });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn anthropic_client_joins_text_blocks() {
        let router = Router::new().route(
            "/v1/messages",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["system"], "Be brief.");
                Json(json!({
                    "content": [
                        {"type": "text", "text": "Part one. "},
                        {"type": "text", "text": "Part two."}
                    ]
                }))
            }),
        );
        let base_url = serve(router).await;
        let config = llm_config(LlmProvider::Anthropic, Some(base_url));
        let client = AnthropicClient::from_config(Client::new(), &config).expect("client");

        let reply = client
            .generate(&[Message::system("Be brief."), Message::user("hi")])
            .await
            .expect("reply");

        assert_eq!(reply, "Part one. Part two.");
    }
}
