//! In-memory generation and embedding capabilities
//!
//! Both fakes answer from fixed tables so tests never touch the network.

use async_trait::async_trait;
use qcb_explore::clients::{ClientError, EmbeddingClient, GenerationClient, GenerationRequest};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Schema name the tie-breaker sends with its requests
const TIE_BREAK_SCHEMA: &str = "code_decision";

/// Generation capability keyed by article title
#[derive(Default)]
pub struct FakeGeneration {
    by_title: HashMap<String, Result<String, ClientError>>,
    /// Verdict returned to tie-break requests; `None` fails them
    tie_break: Option<String>,
    /// Article titles (or "tie_break") in call order
    calls: Mutex<Vec<String>>,
    /// Token cancelled when the named article is generated
    cancel_on: Option<(String, CancellationToken)>,
}

impl FakeGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_article(mut self, title: &str, response: String) -> Self {
        self.by_title.insert(title.to_string(), Ok(response));
        self
    }

    pub fn with_failing_article(mut self, title: &str, error: ClientError) -> Self {
        self.by_title.insert(title.to_string(), Err(error));
        self
    }

    pub fn with_tie_break(mut self, verdict: serde_json::Value) -> Self {
        self.tie_break = Some(verdict.to_string());
        self
    }

    pub fn with_cancel_on(mut self, title: &str, cancel: CancellationToken) -> Self {
        self.cancel_on = Some((title.to_string(), cancel));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of generation calls made for one article
    pub fn calls_for(&self, title: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == title).count()
    }
}

#[async_trait]
impl GenerationClient for FakeGeneration {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ClientError> {
        if request.schema_name == TIE_BREAK_SCHEMA {
            self.calls.lock().unwrap().push("tie_break".to_string());
            return self
                .tie_break
                .clone()
                .ok_or_else(|| ClientError::Network("tie-break service unavailable".to_string()));
        }

        let (title, response) = self
            .by_title
            .iter()
            .find(|(title, _)| request.prompt.contains(&format!("Article Title: {}\n", title)))
            .ok_or(ClientError::EmptyResponse)?;
        self.calls.lock().unwrap().push(title.clone());
        if let Some((cancel_title, cancel)) = &self.cancel_on {
            if cancel_title == title {
                cancel.cancel();
            }
        }
        response.clone()
    }
}

/// Embedding capability keyed by candidate name (first line of the text)
#[derive(Default)]
pub struct FakeEmbedding {
    by_name: HashMap<String, Vec<f32>>,
}

impl FakeEmbedding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vector(mut self, name: &str, vector: Vec<f32>) -> Self {
        self.by_name.insert(name.to_string(), vector);
        self
    }
}

#[async_trait]
impl EmbeddingClient for FakeEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ClientError> {
        let name = text.lines().next().unwrap_or_default();
        self.by_name.get(name).cloned().ok_or(ClientError::Status {
            status: 400,
            body: format!("no vector for '{}'", name),
        })
    }
}

/// Coding response with one entry per `(name, function, quotes)`
pub fn codes_json(codes: &[(&str, &str, &[&str])]) -> String {
    let codes: Vec<serde_json::Value> = codes
        .iter()
        .map(|(name, function, quotes)| {
            json!({
                "name": name,
                "function": function,
                "evidence": quotes,
                "explanation": "",
            })
        })
        .collect();
    json!({ "codes": codes }).to_string()
}

/// 2-d unit vector whose cosine with `[1, 0]` is `cos`
pub fn unit_vector(cos: f32) -> Vec<f32> {
    vec![cos, (1.0 - cos * cos).sqrt()]
}
