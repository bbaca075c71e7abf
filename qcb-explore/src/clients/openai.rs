//! OpenAI-compatible HTTP client
//!
//! Implements both capabilities against an OpenAI-style API:
//! - `POST {base_url}/chat/completions` for generation (`response_format:
//!   json_schema` in structured mode)
//! - `POST {base_url}/embeddings` for embeddings
//!
//! Requests share one token-bucket rate limiter. Per-attempt timeouts are
//! enforced by the caller's retry policy.

use super::{ClientError, EmbeddingClient, GenerationClient, GenerationRequest, ResponseMode};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use qcb_common::config::TomlConfig;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::time::Duration;

/// Longest error body kept in `ClientError::Status`
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Connection and model settings for [`OpenAiClient`]
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub api_key: String,
    pub generation_model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub embedding_model: String,
    /// Requested embedding length (sent as `dimensions`)
    pub embedding_dimension: Option<usize>,
    pub requests_per_second: u32,
}

impl OpenAiSettings {
    pub fn from_config(config: &TomlConfig, api_key: String) -> Self {
        Self {
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
            api_key,
            generation_model: config.generation.model.clone(),
            temperature: config.generation.temperature,
            max_tokens: config.generation.max_tokens,
            embedding_model: config.embedding.model.clone(),
            embedding_dimension: Some(config.embedding.dimension),
            requests_per_second: config.api.requests_per_second,
        }
    }
}

/// OpenAI-compatible generation and embedding client
pub struct OpenAiClient {
    client: Client,
    settings: OpenAiSettings,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl OpenAiClient {
    pub fn new(settings: OpenAiSettings) -> Result<Self, ClientError> {
        if settings.api_key.trim().is_empty() {
            return Err(ClientError::NotConfigured("API key is empty".to_string()));
        }

        let client = Client::builder()
            .user_agent(qcb_common::config::get_user_agent())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClientError::NotConfigured(format!("HTTP client build failed: {}", e)))?;

        let per_second = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(per_second));

        Ok(Self {
            client,
            settings,
            rate_limiter,
        })
    }

    pub fn settings(&self) -> &OpenAiSettings {
        &self.settings
    }

    fn chat_body(&self, request: &GenerationRequest) -> Value {
        let mut body = json!({
            "model": self.settings.generation_model,
            "temperature": self.settings.temperature,
            "messages": [
                {"role": "system", "content": request.system_context},
                {"role": "user", "content": request.effective_prompt()},
            ],
        });

        if let Some(max_tokens) = self.settings.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        if let (ResponseMode::Structured, Some(schema)) = (request.mode, &request.schema) {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "schema": schema,
                },
            });
        }

        body
    }

    fn embedding_body(&self, text: &str) -> Value {
        let mut body = json!({
            "model": self.settings.embedding_model,
            "input": text,
        });
        if let Some(dimension) = self.settings.embedding_dimension {
            body["dimensions"] = json!(dimension);
        }
        body
    }

    async fn post(&self, path: &str, body: &Value) -> Result<String, ClientError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/{}", self.settings.base_url, path);
        tracing::debug!(url = %url, "Sending model API request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ClientError::Network(format!("Read response body failed: {}", e)))?;

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        Ok(text)
    }
}

fn parse_chat_response(body: &str) -> Result<String, ClientError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ClientError::Parse(format!("Chat response: {}", e)))?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(ClientError::EmptyResponse)
}

fn parse_embedding_response(body: &str) -> Result<Vec<f32>, ClientError> {
    let response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| ClientError::Parse(format!("Embedding response: {}", e)))?;

    response
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .filter(|v| !v.is_empty())
        .ok_or(ClientError::EmptyResponse)
}

#[async_trait]
impl GenerationClient for OpenAiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ClientError> {
        let body = self.chat_body(request);
        let text = self.post("chat/completions", &body).await?;
        parse_chat_response(&text)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ClientError> {
        let body = self.embedding_body(text);
        let text = self.post("embeddings", &body).await?;
        parse_embedding_response(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenAiClient {
        let mut config = TomlConfig::default();
        config.generation.max_tokens = Some(800);
        config.embedding.dimension = 256;
        OpenAiClient::new(OpenAiSettings::from_config(&config, "sk-test".to_string())).unwrap()
    }

    fn request(mode: ResponseMode) -> GenerationRequest {
        GenerationRequest {
            system_context: "You are a coder".to_string(),
            prompt: "Code this article".to_string(),
            schema: Some(json!({"type": "object"})),
            schema_name: "codes".to_string(),
            mode,
        }
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let settings = OpenAiSettings::from_config(&TomlConfig::default(), "  ".to_string());
        assert!(matches!(
            OpenAiClient::new(settings),
            Err(ClientError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_structured_body_carries_schema() {
        let body = client().chat_body(&request(ResponseMode::Structured));
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 800);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "codes");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Code this article");
    }

    #[test]
    fn test_relaxed_body_has_no_response_format() {
        let body = client().chat_body(&request(ResponseMode::Relaxed));
        assert!(body.get("response_format").is_none());
        assert!(body["messages"][1]["content"]
            .as_str()
            .unwrap()
            .contains("ONLY valid JSON"));
    }

    #[test]
    fn test_embedding_body_requests_dimension() {
        let body = client().embedding_body("Economic cost");
        assert_eq!(body["dimensions"], 256);
        assert_eq!(body["model"], "text-embedding-3-small");
        assert_eq!(body["input"], "Economic cost");
    }

    #[test]
    fn test_parse_chat_response() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"codes\":[]}"}}]}"#;
        assert_eq!(parse_chat_response(body).unwrap(), "{\"codes\":[]}");

        assert_eq!(
            parse_chat_response(r#"{"choices":[]}"#),
            Err(ClientError::EmptyResponse)
        );
        assert!(matches!(
            parse_chat_response("<html>bad gateway</html>"),
            Err(ClientError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_embedding_response() {
        let body = r#"{"data":[{"embedding":[0.5,-0.25],"index":0}],"model":"m"}"#;
        assert_eq!(parse_embedding_response(body).unwrap(), vec![0.5, -0.25]);
        assert_eq!(
            parse_embedding_response(r#"{"data":[]}"#),
            Err(ClientError::EmptyResponse)
        );
    }
}
