//! AI-assisted tie-break for function conflicts
//!
//! When a candidate is close to an existing code but classified under a
//! different function, the decision engine may ask the generation capability
//! to choose between MERGE, UPDATE, CREATE_NEW and NO_ACTION. The answer is a
//! refinement only: any failure or unreadable verdict leaves the conflict
//! unresolved.

use crate::clients::{ClientError, GenerationClient, GenerationRequest, ResponseMode};
use crate::error::{CodebookError, CodebookResult};
use crate::framework::{FunctionSet, ResearchFramework};
use crate::response::{parse_relaxed, parse_strict};
use crate::retry::RetryPolicy;
use crate::types::{Candidate, Code, Function};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Operation chosen by the tie-breaker
#[derive(Debug, Clone, PartialEq)]
pub enum TieBreakChoice {
    Merge,
    Update {
        new_name: Option<String>,
        function: Option<Function>,
    },
    CreateNew,
    NoAction,
    /// Verdict named no known operation
    Unresolved,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TieBreakVerdict {
    pub choice: TieBreakChoice,
    /// Clamped to [0, 1]
    pub confidence: f32,
    pub reasoning: String,
}

/// Resolves a function conflict between a candidate and its top match
#[async_trait]
pub trait TieBreaker: Send + Sync {
    async fn resolve(&self, existing: &Code, candidate: &Candidate) -> CodebookResult<TieBreakVerdict>;
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    operation: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    new_name: Option<String>,
    #[serde(default)]
    function: Option<String>,
}

/// Tie-breaker backed by the generation capability
pub struct AssistedTieBreaker {
    client: Arc<dyn GenerationClient>,
    framework: Arc<ResearchFramework>,
    functions: FunctionSet,
    policy: RetryPolicy,
}

impl AssistedTieBreaker {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        framework: Arc<ResearchFramework>,
        policy: RetryPolicy,
    ) -> Self {
        let functions = framework.function_set();
        Self {
            client,
            framework,
            functions,
            policy,
        }
    }
}

#[async_trait]
impl TieBreaker for AssistedTieBreaker {
    async fn resolve(&self, existing: &Code, candidate: &Candidate) -> CodebookResult<TieBreakVerdict> {
        let base = GenerationRequest {
            system_context: self.framework.decision_context(),
            prompt: self.framework.decision_prompt(existing, candidate),
            schema: Some(self.framework.decision_schema()),
            schema_name: "code_decision".to_string(),
            mode: ResponseMode::Structured,
        };

        let result = self
            .policy
            .run("tie_break", |attempt| {
                let mut request = base.clone();
                if attempt > 1 {
                    request.mode = ResponseMode::Relaxed;
                }
                let client = Arc::clone(&self.client);
                async move {
                    let text = client.generate(&request).await?;
                    let raw: RawVerdict = match request.mode {
                        ResponseMode::Structured => parse_strict(&text),
                        ResponseMode::Relaxed => parse_relaxed(&text),
                    }
                    .map_err(ClientError::Parse)?;
                    Ok(raw)
                }
            })
            .await;

        let raw = result.map_err(|e| CodebookError::GenerationFailure {
            attempts: e.attempts,
            message: e.last_error.to_string(),
        })?;

        let verdict = interpret(raw, &self.functions);
        debug!(
            existing = existing.id.0,
            candidate = %candidate.name,
            choice = ?verdict.choice,
            confidence = verdict.confidence,
            "Tie-break verdict"
        );
        Ok(verdict)
    }
}

fn interpret(raw: RawVerdict, functions: &FunctionSet) -> TieBreakVerdict {
    let confidence = if raw.confidence.is_finite() {
        raw.confidence.clamp(0.0, 1.0) as f32
    } else {
        0.0
    };

    let choice = match raw.operation.trim().to_ascii_uppercase().as_str() {
        "MERGE" => TieBreakChoice::Merge,
        "UPDATE" => {
            let new_name = raw
                .new_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty());
            let function = match raw.function.as_deref().map(str::trim) {
                Some(label) if !label.is_empty() => match functions.parse(label) {
                    Ok(function) => Some(function),
                    Err(e) => {
                        warn!(error = %e, "Ignoring tie-break function outside the framework");
                        None
                    }
                },
                _ => None,
            };
            TieBreakChoice::Update { new_name, function }
        }
        "CREATE_NEW" => TieBreakChoice::CreateNew,
        "NO_ACTION" => TieBreakChoice::NoAction,
        other => {
            warn!(operation = other, "Tie-break named an unknown operation");
            TieBreakChoice::Unresolved
        }
    };

    TieBreakVerdict {
        choice,
        confidence,
        reasoning: raw.reasoning,
    }
}
