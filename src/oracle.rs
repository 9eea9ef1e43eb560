//! Text-completion oracle used for fallback parsing and categorization.
//!
//! Any OpenAI-compatible chat endpoint works (OpenAI, OpenRouter, Ollama in
//! compatibility mode). Replies are expected to be a single JSON object.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Oracle returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Oracle returned an empty response")]
    EmptyResponse,

    #[error("Oracle call timed out after {0}s")]
    Timeout(u64),

    #[error("Oracle is not configured")]
    NotConfigured,

    #[error("Invalid oracle reply: {0}")]
    Reply(#[from] ReplyError),
}

/// A reply that arrived but could not be decoded into the expected shape.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplyError {
    #[error("reply was empty")]
    Empty,

    #[error("reply was not valid JSON for this request: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait CompletionOracle: Send + Sync {
    /// Send one system + user prompt pair, returning the raw reply text.
    async fn complete(&self, system: &str, user: &str) -> Result<String, OracleError>;
}

/// Run one oracle call under a time budget. Elapsed budget becomes `Timeout`.
pub async fn complete_with_timeout(
    oracle: &dyn CompletionOracle,
    system: &str,
    user: &str,
    timeout_secs: u64,
) -> Result<String, OracleError> {
    let budget = Duration::from_secs(timeout_secs);
    match tokio::time::timeout(budget, oracle.complete(system, user)).await {
        Ok(result) => result,
        Err(_) => Err(OracleError::Timeout(timeout_secs)),
    }
}

/// Decode a JSON reply, tolerating a surrounding markdown code fence.
pub fn decode_reply<T: DeserializeOwned>(raw: &str) -> Result<T, ReplyError> {
    let mut body = raw.trim();
    if let Some(rest) = body.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        body = rest.strip_suffix("```").unwrap_or(rest).trim();
    }
    if body.is_empty() {
        return Err(ReplyError::Empty);
    }
    serde_json::from_str(body).map_err(|e| ReplyError::Malformed(e.to_string()))
}

// ---------------------------------------------------------------------------
// OpenAI-compatible backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OracleConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
        }
    }
}

impl OracleConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
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
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

pub struct OpenAiOracle {
    client: Client,
    config: OracleConfig,
}

impl OpenAiOracle {
    pub fn new(config: OracleConfig) -> Result<Self, OracleError> {
        if !config.is_configured() {
            return Err(OracleError::NotConfigured);
        }
        // Calls are bounded by `complete_with_timeout`; the client has no timeout of its own.
        let client = Client::builder().build()?;
        Ok(Self { client, config })
    }

    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.post(&url);
        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {api_key}"));
        }
        req.header("Content-Type", "application/json")
    }
}

#[async_trait]
impl CompletionOracle for OpenAiOracle {
    async fn complete(&self, system: &str, user: &str) -> Result<String, OracleError> {
        debug!(model = %self.config.model, prompt_len = user.len(), "oracle request");

        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
            temperature: 0.1,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self.build_request("/chat/completions").json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .json::<ApiErrorResponse>()
                .await
                .map(|body| body.error.message)
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(OracleError::Status { status, message });
        }

        let body: ChatCompletionResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(OracleError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> OracleConfig {
        OracleConfig {
            base_url: server.uri(),
            model: "test-model".to_string(),
            api_key: Some("test-key".to_string()),
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Flag {
        ok: bool,
    }

    #[test]
    fn test_decode_reply_plain_and_fenced() {
        assert_eq!(decode_reply::<Flag>(r#"{"ok":true}"#), Ok(Flag { ok: true }));
        assert_eq!(
            decode_reply::<Flag>("```json\n{\"ok\":false}\n```"),
            Ok(Flag { ok: false })
        );
    }

    #[test]
    fn test_decode_reply_errors() {
        assert_eq!(decode_reply::<Flag>("   "), Err(ReplyError::Empty));
        assert!(matches!(decode_reply::<Flag>("not json"), Err(ReplyError::Malformed(_))));
        assert!(matches!(decode_reply::<Flag>(r#"{"ok":"yes"}"#), Err(ReplyError::Malformed(_))));
    }

    #[test]
    fn test_unconfigured_oracle_is_rejected() {
        let result = OpenAiOracle::new(OracleConfig::default());
        assert!(matches!(result, Err(OracleError::NotConfigured)));
        let blank = OracleConfig { api_key: Some("  ".to_string()), ..OracleConfig::default() };
        assert!(!blank.is_configured());
    }

    #[tokio::test]
    async fn test_complete_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"ok\":true}"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let oracle = OpenAiOracle::new(config_for(&server)).unwrap();
        let reply = oracle.complete("system", "user").await.unwrap();
        assert_eq!(reply, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn test_error_status_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"message": "Rate limit exceeded", "type": "rate_limit_exceeded"}
            })))
            .mount(&server)
            .await;

        let oracle = OpenAiOracle::new(config_for(&server)).unwrap();
        match oracle.complete("s", "u").await {
            Err(OracleError::Status { status, message }) => {
                assert_eq!(status, 429);
                assert_eq!(message, "Rate limit exceeded");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_content_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": null}}]
            })))
            .mount(&server)
            .await;

        let oracle = OpenAiOracle::new(config_for(&server)).unwrap();
        assert!(matches!(oracle.complete("s", "u").await, Err(OracleError::EmptyResponse)));
    }

    struct SlowOracle;

    #[async_trait]
    impl CompletionOracle for SlowOracle {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, OracleError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(String::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_error() {
        let result = complete_with_timeout(&SlowOracle, "s", "u", 3).await;
        assert!(matches!(result, Err(OracleError::Timeout(3))));
    }
}
