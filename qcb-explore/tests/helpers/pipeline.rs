//! Orchestrator wiring over the fake capabilities

use qcb_explore::candidate_generator::CandidateGenerator;
use qcb_explore::clients::{EmbeddingClient, GenerationClient};
use qcb_explore::decision::{DecisionConfig, DecisionEngine};
use qcb_explore::framework::{FunctionSet, ResearchFramework};
use qcb_explore::retry::RetryPolicy;
use qcb_explore::review::{AutoApprove, ReviewHook};
use qcb_explore::tie_break::AssistedTieBreaker;
use qcb_explore::types::{Candidate, Evidence};
use qcb_explore::{ExplorationOrchestrator, OrchestratorSettings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Embedding length used by every pipeline test
pub const DIMENSION: usize = 2;

pub struct PipelineOptions {
    pub checkpoint_path: Option<PathBuf>,
    pub max_articles: Option<usize>,
    pub review: Arc<dyn ReviewHook>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            checkpoint_path: None,
            max_articles: None,
            review: Arc::new(AutoApprove),
        }
    }
}

/// Two attempts, no backoff
pub fn test_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        timeout: Duration::from_secs(5),
        initial_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
    }
}

pub fn entman_functions() -> FunctionSet {
    ResearchFramework::entman().function_set()
}

/// Orchestrator with thresholds 0.8 / 0.95, floor 0.6 and an assisted tie-breaker
pub fn build_orchestrator(
    generation: Arc<dyn GenerationClient>,
    embedding: Arc<dyn EmbeddingClient>,
    options: PipelineOptions,
) -> ExplorationOrchestrator {
    let framework = Arc::new(ResearchFramework::entman());
    let generator = Arc::new(CandidateGenerator::new(
        Arc::clone(&generation),
        embedding,
        Arc::clone(&framework),
        test_policy(),
        test_policy(),
        DIMENSION,
    ));

    let decisions = DecisionEngine::new(DecisionConfig {
        similarity_threshold: 0.8,
        merge_threshold: 0.95,
        confidence_floor: 0.6,
    })
    .with_tie_breaker(Arc::new(AssistedTieBreaker::new(
        generation,
        framework,
        test_policy(),
    )));

    let settings = OrchestratorSettings {
        similarity_k: 5,
        similarity_threshold: 0.8,
        prefetch_articles: 2,
        checkpoint_every_articles: 1,
        checkpoint_path: options.checkpoint_path,
        max_articles: options.max_articles,
    };

    ExplorationOrchestrator::new(generator, decisions, settings).with_review_hook(options.review)
}

/// Candidate with evidence from one article
pub fn candidate(
    name: &str,
    function: &str,
    article_id: u64,
    quotes: &[&str],
    embedding: Option<Vec<f32>>,
) -> Candidate {
    Candidate {
        name: name.to_string(),
        function: entman_functions().parse(function).unwrap(),
        evidence: quotes.iter().map(|q| Evidence::new(article_id, *q)).collect(),
        explanation: None,
        embedding,
    }
}
