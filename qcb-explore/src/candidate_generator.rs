//! Candidate generation: article → validated, embedded candidates
//!
//! **Flow:**
//! 1. Render the framework's coding prompt for the article
//! 2. Call the generation capability under the generation retry policy
//!    (attempt 1 structured + strict parse, later attempts relaxed)
//! 3. Validate every returned code on its own; failures become
//!    `RejectedCandidate` entries, never a rejected article
//! 4. Embed the accepted candidates concurrently; an embedding failure
//!    leaves `embedding = None`

use crate::articles::Article;
use crate::clients::{ClientError, EmbeddingClient, GenerationClient, GenerationRequest, ResponseMode};
use crate::error::{CodebookError, CodebookResult};
use crate::framework::{FunctionSet, ResearchFramework};
use crate::response::{parse_relaxed, parse_strict};
use crate::retry::RetryPolicy;
use crate::types::{ArticleId, Candidate, Evidence};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A returned code that failed validation
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedCandidate {
    /// Position in the generator's response
    pub index: usize,
    pub name: String,
    pub error: String,
}

/// Output of one article's generation
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedBatch {
    pub article_id: ArticleId,
    pub candidates: Vec<Candidate>,
    pub rejected: Vec<RejectedCandidate>,
}

#[derive(Debug, Deserialize)]
struct RawCode {
    #[serde(default)]
    name: String,
    #[serde(default)]
    function: String,
    #[serde(default)]
    evidence: Vec<String>,
    #[serde(default)]
    explanation: Option<String>,
}

/// `{"codes": [...]}` or a bare array
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawResponse {
    Wrapped { codes: Vec<RawCode> },
    Bare(Vec<RawCode>),
}

impl RawResponse {
    fn into_codes(self) -> Vec<RawCode> {
        match self {
            RawResponse::Wrapped { codes } => codes,
            RawResponse::Bare(codes) => codes,
        }
    }
}

pub struct CandidateGenerator {
    generation: Arc<dyn GenerationClient>,
    embedding: Arc<dyn EmbeddingClient>,
    framework: Arc<ResearchFramework>,
    functions: FunctionSet,
    generation_policy: RetryPolicy,
    embedding_policy: RetryPolicy,
    dimension: usize,
}

impl CandidateGenerator {
    pub fn new(
        generation: Arc<dyn GenerationClient>,
        embedding: Arc<dyn EmbeddingClient>,
        framework: Arc<ResearchFramework>,
        generation_policy: RetryPolicy,
        embedding_policy: RetryPolicy,
        dimension: usize,
    ) -> Self {
        let functions = framework.function_set();
        Self {
            generation,
            embedding,
            framework,
            functions,
            generation_policy,
            embedding_policy,
            dimension,
        }
    }

    /// Generate candidates for one article
    ///
    /// Fails only with `GenerationFailure`; everything else degrades a
    /// single candidate.
    pub async fn generate(&self, article: &Article) -> CodebookResult<GeneratedBatch> {
        let raw_codes = self.request_codes(article).await?;

        let mut candidates = Vec::with_capacity(raw_codes.len());
        let mut rejected = Vec::new();
        for (index, raw) in raw_codes.into_iter().enumerate() {
            let name = raw.name.trim().to_string();
            match validate_raw(raw, article.id, &self.functions) {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    debug!(article_id = article.id, index, name = %name, error = %e, "Rejected candidate");
                    rejected.push(RejectedCandidate {
                        index,
                        name,
                        error: e.to_string(),
                    });
                }
            }
        }

        let embeddings =
            futures::future::join_all(candidates.iter().map(|c| self.embed_candidate(article.id, c)))
                .await;
        for (candidate, embedding) in candidates.iter_mut().zip(embeddings) {
            candidate.embedding = embedding;
        }

        info!(
            article_id = article.id,
            accepted = candidates.len(),
            rejected = rejected.len(),
            embedded = candidates.iter().filter(|c| c.has_embedding()).count(),
            "Generated candidates"
        );

        Ok(GeneratedBatch {
            article_id: article.id,
            candidates,
            rejected,
        })
    }

    async fn request_codes(&self, article: &Article) -> CodebookResult<Vec<RawCode>> {
        let base = GenerationRequest {
            system_context: self.framework.framework_context(),
            prompt: self.framework.coding_prompt(&article.title, &article.content),
            schema: Some(self.framework.response_schema()),
            schema_name: "codebook_codes".to_string(),
            mode: ResponseMode::Structured,
        };

        self.generation_policy
            .run("generation", |attempt| {
                let mut request = base.clone();
                if attempt > 1 {
                    request.mode = ResponseMode::Relaxed;
                }
                let client = Arc::clone(&self.generation);
                async move {
                    let text = client.generate(&request).await?;
                    let response: RawResponse = match request.mode {
                        ResponseMode::Structured => parse_strict(&text),
                        ResponseMode::Relaxed => parse_relaxed(&text),
                    }
                    .map_err(ClientError::Parse)?;
                    Ok(response.into_codes())
                }
            })
            .await
            .map_err(|e| CodebookError::GenerationFailure {
                attempts: e.attempts,
                message: e.last_error.to_string(),
            })
    }

    async fn embed_candidate(&self, article_id: ArticleId, candidate: &Candidate) -> Option<Vec<f32>> {
        match self.embed_text(&candidate.canonical_text()).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(
                    article_id,
                    candidate = %candidate.name,
                    error = %e,
                    "Embedding unavailable, candidate proceeds without similarity search"
                );
                None
            }
        }
    }

    /// Embed `text` under the embedding retry policy and check its length
    /// and that every component is finite
    pub async fn embed_text(&self, text: &str) -> CodebookResult<Vec<f32>> {
        let vector = self
            .embedding_policy
            .run("embedding", |_attempt| {
                let client = Arc::clone(&self.embedding);
                let text = text.to_string();
                async move { client.embed(&text).await }
            })
            .await
            .map_err(|e| CodebookError::EmbeddingFailure(e.to_string()))?;

        if vector.len() != self.dimension {
            return Err(CodebookError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(CodebookError::EmbeddingFailure(
                "Embedding contains non-finite components".to_string(),
            ));
        }
        Ok(vector)
    }
}

/// Turn one raw response entry into a candidate
///
/// Quotes are trimmed, empty quotes dropped and repeats collapsed.
fn validate_raw(raw: RawCode, article_id: ArticleId, functions: &FunctionSet) -> CodebookResult<Candidate> {
    let name = raw.name.trim().to_string();
    if name.is_empty() {
        return Err(CodebookError::Validation("Candidate name is empty".to_string()));
    }

    let function = functions.parse(&raw.function)?;

    let mut evidence: Vec<Evidence> = Vec::with_capacity(raw.evidence.len());
    for quote in raw.evidence {
        let quote = quote.trim();
        if quote.is_empty() || evidence.iter().any(|e| e.quote == quote) {
            continue;
        }
        evidence.push(Evidence::new(article_id, quote));
    }
    if evidence.is_empty() {
        return Err(CodebookError::InsufficientEvidence(format!(
            "Candidate '{}' has no usable quotes",
            name
        )));
    }

    let explanation = raw
        .explanation
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());

    Ok(Candidate {
        name,
        function,
        evidence,
        explanation,
        embedding: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedGeneration {
        responses: Mutex<Vec<Result<String, ClientError>>>,
        modes: Mutex<Vec<ResponseMode>>,
    }

    #[async_trait]
    impl GenerationClient for ScriptedGeneration {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, ClientError> {
            self.modes.lock().unwrap().push(request.mode);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(ClientError::EmptyResponse);
            }
            responses.remove(0)
        }
    }

    /// Embeds by text length; texts containing "fail" error out and texts
    /// containing "overflow" come back with an infinite component
    struct LengthEmbedding {
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingClient for LengthEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ClientError> {
            if text.contains("fail") {
                return Err(ClientError::Status {
                    status: 400,
                    body: "bad input".to_string(),
                });
            }
            let mut v = vec![0.0; self.dimension];
            v[0] = if text.contains("overflow") {
                f32::INFINITY
            } else {
                text.len() as f32
            };
            Ok(v)
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            timeout: Duration::from_secs(1),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn generator(
        responses: Vec<Result<String, ClientError>>,
    ) -> (CandidateGenerator, Arc<ScriptedGeneration>) {
        let generation = Arc::new(ScriptedGeneration {
            responses: Mutex::new(responses),
            modes: Mutex::new(Vec::new()),
        });
        let generator = CandidateGenerator::new(
            Arc::clone(&generation) as Arc<dyn GenerationClient>,
            Arc::new(LengthEmbedding { dimension: 3 }),
            Arc::new(ResearchFramework::entman()),
            policy(),
            policy(),
            3,
        );
        (generator, generation)
    }

    fn article() -> Article {
        Article::new(42, "Fuel prices", "Fuel prices rose again.")
    }

    #[tokio::test]
    async fn test_valid_and_rejected_candidates() {
        let response = r#"{"codes": [
            {"name": " Rising costs ", "function": "PROBLEM_DEFINITION",
             "evidence": [" prices rose ", "", "prices rose", "again"], "explanation": "x"},
            {"name": "", "function": "PROBLEM_DEFINITION", "evidence": ["q"], "explanation": ""},
            {"name": "Blame", "function": "BLAME", "evidence": ["q"], "explanation": ""},
            {"name": "Quiet", "function": "MORAL_EVALUATION", "evidence": ["  "], "explanation": ""}
        ]}"#;
        let (generator, _) = generator(vec![Ok(response.to_string())]);

        let batch = generator.generate(&article()).await.unwrap();
        assert_eq!(batch.article_id, 42);
        assert_eq!(batch.candidates.len(), 1);

        let candidate = &batch.candidates[0];
        assert_eq!(candidate.name, "Rising costs");
        let quotes: Vec<&str> = candidate.evidence.iter().map(|e| e.quote.as_str()).collect();
        assert_eq!(quotes, vec!["prices rose", "again"]);
        assert!(candidate.evidence.iter().all(|e| e.article_id == 42));
        assert_eq!(
            candidate.embedding.as_ref().map(|v| v[0]),
            Some(candidate.canonical_text().len() as f32)
        );

        let rejected: Vec<usize> = batch.rejected.iter().map(|r| r.index).collect();
        assert_eq!(rejected, vec![1, 2, 3]);
        assert!(batch.rejected[1].error.contains("BLAME"));
        assert!(batch.rejected[2].error.contains("Insufficient evidence"));
    }

    #[tokio::test]
    async fn test_relaxed_retry_accepts_bare_array_in_fences() {
        let (generator, generation) = generator(vec![
            Ok("Here are the codes you asked for".to_string()),
            Ok("```json\n[{\"name\": \"Cost\", \"function\": \"PROBLEM_DEFINITION\", \"evidence\": [\"q\"]}]\n```".to_string()),
        ]);

        let batch = generator.generate(&article()).await.unwrap();
        assert_eq!(batch.candidates.len(), 1);
        assert!(batch.candidates[0].explanation.is_none());
        assert_eq!(
            *generation.modes.lock().unwrap(),
            vec![ResponseMode::Structured, ResponseMode::Relaxed]
        );
    }

    #[tokio::test]
    async fn test_exhausted_generation_fails_article() {
        let (generator, _) = generator(vec![
            Err(ClientError::Network("reset".into())),
            Err(ClientError::Network("reset".into())),
        ]);

        let err = generator.generate(&article()).await.unwrap_err();
        assert!(matches!(err, CodebookError::GenerationFailure { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_candidate_unembedded() {
        let response = r#"[{"name": "fail case", "function": "TREATMENT_ADVOCACY", "evidence": ["q"]}]"#;
        let (generator, _) = generator(vec![Ok(response.to_string())]);

        let batch = generator.generate(&article()).await.unwrap();
        assert_eq!(batch.candidates.len(), 1);
        assert!(batch.candidates[0].embedding.is_none());
    }

    #[tokio::test]
    async fn test_non_finite_embedding_leaves_candidate_unembedded() {
        let response = r#"[{"name": "overflow case", "function": "PROBLEM_DEFINITION", "evidence": ["q"]}]"#;
        let (generator, _) = generator(vec![Ok(response.to_string())]);

        let batch = generator.generate(&article()).await.unwrap();
        assert_eq!(batch.candidates.len(), 1);
        assert!(batch.candidates[0].embedding.is_none());

        let err = generator.embed_text("overflow").await.unwrap_err();
        assert!(matches!(err, CodebookError::EmbeddingFailure(_)));
    }

    #[tokio::test]
    async fn test_wrong_length_embedding_rejected() {
        let generator = CandidateGenerator::new(
            Arc::new(ScriptedGeneration {
                responses: Mutex::new(vec![]),
                modes: Mutex::new(vec![]),
            }),
            Arc::new(LengthEmbedding { dimension: 2 }),
            Arc::new(ResearchFramework::entman()),
            policy(),
            policy(),
            3,
        );

        let err = generator.embed_text("text").await.unwrap_err();
        assert!(matches!(
            err,
            CodebookError::DimensionMismatch { expected: 3, actual: 2 }
        ));
    }
}
