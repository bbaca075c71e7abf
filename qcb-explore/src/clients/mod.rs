//! External capability boundary
//!
//! The engine consumes text generation and embedding as fallible async
//! functions. `openai` provides the HTTP implementation; tests substitute
//! in-memory fakes.

pub mod openai;

pub use openai::OpenAiClient;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Transport-level failure of an external capability call
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// Attempt exceeded its timeout
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Connection or request failure
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),

    /// Response carried no usable content
    #[error("Empty response")]
    EmptyResponse,

    /// Client cannot make requests (e.g. missing API key)
    #[error("Client not configured: {0}")]
    NotConfigured(String),
}

impl ClientError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Timeout(_)
            | ClientError::Network(_)
            | ClientError::Parse(_)
            | ClientError::EmptyResponse => true,
            ClientError::Status { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            ClientError::NotConfigured(_) => false,
        }
    }
}

/// How the generation call should shape its output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Ask the service to enforce the JSON schema
    Structured,
    /// Plain completion with an explicit "JSON only" instruction
    Relaxed,
}

/// One text generation request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_context: String,
    pub prompt: String,
    pub schema: Option<Value>,
    pub schema_name: String,
    pub mode: ResponseMode,
}

/// Instruction appended to prompts in relaxed mode
pub const RELAXED_JSON_INSTRUCTION: &str =
    "IMPORTANT: Respond with ONLY valid JSON, no other text.";

impl GenerationRequest {
    /// Prompt text actually sent for this mode
    pub fn effective_prompt(&self) -> String {
        match self.mode {
            ResponseMode::Structured => self.prompt.clone(),
            ResponseMode::Relaxed => format!("{}\n\n{}", self.prompt, RELAXED_JSON_INSTRUCTION),
        }
    }
}

/// Text generation capability
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ClientError>;
}

/// Embedding capability
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ClientError>;
}
