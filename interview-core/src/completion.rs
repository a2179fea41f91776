//! Completion client: chat-completion API used for interview turns,
//! summaries and scores
//!
//! Provides a `CompletionClient` trait so the conversation controller and
//! the analysis requests can be driven by fakes in tests, plus an
//! OpenAI-compatible HTTP implementation.
//!
//! Calls are never retried: a failure surfaces to the caller, which decides
//! whether to report it in-band or as an HTTP error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CompletionSettings;

// ============================================================================
// CompletionClient trait
// ============================================================================

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send the full message history and return the trimmed reply text.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, CompletionError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Message types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Completion response contained no choices")]
    EmptyResponse,

    #[error("Completion service not configured")]
    NotConfigured,
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl CompletionConfig {
    pub fn new(api_key: Option<String>, model: String, timeout: Duration) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        Self {
            api_key,
            model,
            timeout,
        }
    }
}

/// Build the configured client. Returns `None` when no API key is available;
/// the service keeps running and reports the integration as not configured.
pub fn create_completion_client(settings: &CompletionSettings) -> Option<Arc<dyn CompletionClient>> {
    let config = CompletionConfig::new(
        settings.api_key.clone(),
        settings.model.clone(),
        Duration::from_secs(settings.timeout_seconds),
    );

    match OpenAiCompletionClient::with_base_url(config, settings.base_url.clone()) {
        Ok(client) => {
            tracing::info!(model = %settings.model, "Completion client configured");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Completion client unavailable");
            None
        }
    }
}

// ============================================================================
// OpenAI API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

// ============================================================================
// OpenAiCompletionClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenAiCompletionClient {
    client: Client,
    config: CompletionConfig,
    base_url: String,
}

impl OpenAiCompletionClient {
    pub fn new(config: CompletionConfig) -> Result<Self, CompletionError> {
        Self::with_base_url(config, "https://api.openai.com/v1".to_string())
    }

    /// Create a client with a custom base URL (for testing / compatible gateways)
    pub fn with_base_url(
        config: CompletionConfig,
        base_url: String,
    ) -> Result<Self, CompletionError> {
        if config.api_key.is_empty() {
            return Err(CompletionError::MissingApiKey);
        }

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::error!(code = status.as_u16(), message = %message, "Completion API error");

            return Err(CompletionError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let chat_response: ChatResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .ok_or(CompletionError::EmptyResponse)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: &str) -> CompletionConfig {
        CompletionConfig {
            api_key: api_key.to_string(),
            model: "gpt-3.5-turbo".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    fn mock_chat_response(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": content } }
            ]
        })
    }

    #[tokio::test]
    async fn test_complete_sends_history_and_returns_trimmed_reply() {
        let mock_server = MockServer::start().await;
        let client = OpenAiCompletionClient::with_base_url(test_config("sk-test"), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_json(serde_json::json!({
                "model": "gpt-3.5-turbo",
                "messages": [
                    { "role": "system", "content": "be brief" },
                    { "role": "user", "content": "I build APIs." }
                ],
                "temperature": 0.5
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(mock_chat_response("  Which frameworks?\n")),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("I build APIs.")];
        let reply = client.complete(&messages, 0.5).await.unwrap();

        assert_eq!(reply, "Which frameworks?");
    }

    #[tokio::test]
    async fn test_complete_surfaces_api_error_without_retry() {
        let mock_server = MockServer::start().await;
        let client =
            OpenAiCompletionClient::with_base_url(test_config("sk-test"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit exceeded", "type": "requests" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = client.complete(&[ChatMessage::user("hi")], 0.3).await;

        match result {
            Err(CompletionError::Api { code, message }) => {
                assert_eq!(code, 429);
                assert_eq!(message, "Rate limit exceeded");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_non_json_error_body_is_passed_through() {
        let mock_server = MockServer::start().await;
        let client =
            OpenAiCompletionClient::with_base_url(test_config("sk-test"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&mock_server)
            .await;

        match client.complete(&[ChatMessage::user("hi")], 0.3).await {
            Err(CompletionError::Api { code, message }) => {
                assert_eq!(code, 502);
                assert_eq!(message, "bad gateway");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_without_choices_is_empty_response() {
        let mock_server = MockServer::start().await;
        let client =
            OpenAiCompletionClient::with_base_url(test_config("sk-test"), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&mock_server)
            .await;

        let result = client.complete(&[ChatMessage::user("hi")], 0.3).await;
        assert!(matches!(result, Err(CompletionError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_complete_times_out() {
        let mock_server = MockServer::start().await;
        let config = CompletionConfig {
            timeout: Duration::from_millis(100),
            ..test_config("sk-test")
        };
        let client = OpenAiCompletionClient::with_base_url(config, mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(mock_chat_response("late"))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let result = client.complete(&[ChatMessage::user("hi")], 0.3).await;
        assert!(matches!(result, Err(CompletionError::Http(_))));
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        let result = OpenAiCompletionClient::new(test_config(""));
        assert!(matches!(result, Err(CompletionError::MissingApiKey)));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_value(ChatMessage::assistant("ok")).unwrap();
        assert_eq!(json["role"], "assistant");
    }
}
