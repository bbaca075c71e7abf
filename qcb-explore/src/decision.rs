//! Decision engine: candidate + matches → exactly one operation
//!
//! Deterministic layer, evaluated in order:
//! 1. No matches → CREATE
//! 2. Top score below the similarity threshold → NO_ACTION (below_action_threshold)
//! 3. Top match has a different function → assisted tie-break, else
//!    NO_ACTION (ambiguous_function_conflict)
//! 4. Top score at or above the merge threshold → MERGE
//! 5. Otherwise UPDATE when the candidate brings new evidence, else
//!    NO_ACTION (duplicate_evidence)
//!
//! An assisted UPDATE that renames nothing, keeps the function and adds no
//! evidence becomes NO_ACTION (duplicate_evidence).
//!
//! Confidence is the top match score (1.0 for a CREATE from an embedded
//! candidate with no matches, 0.5 for a blind CREATE). An assisted decision
//! takes the lower of the score and the tie-breaker's confidence.

use crate::codebook::Codebook;
use crate::tie_break::{TieBreakChoice, TieBreaker};
use crate::types::{Candidate, FieldChanges, NoActionReason, Operation, SimilarityMatch};
use qcb_common::config::ExplorationConfig;
use std::sync::Arc;
use tracing::{debug, warn};

/// Confidence of a CREATE for a candidate that could not be embedded
pub const BLIND_CREATE_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionConfig {
    pub similarity_threshold: f32,
    pub merge_threshold: f32,
    /// Decisions below this confidence are routed to review
    pub confidence_floor: f32,
}

impl DecisionConfig {
    pub fn from_exploration(config: &ExplorationConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            merge_threshold: config.merge_threshold,
            confidence_floor: config.confidence_floor,
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self::from_exploration(&ExplorationConfig::default())
    }
}

/// Outcome of deciding one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub operation: Operation,
    /// In [0, 1]
    pub confidence: f32,
    pub rationale: String,
    pub matches: Vec<SimilarityMatch>,
    /// Chosen by the assisted tie-break
    pub assisted: bool,
    pub requires_review: bool,
}

pub struct DecisionEngine {
    config: DecisionConfig,
    tie_breaker: Option<Arc<dyn TieBreaker>>,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        Self {
            config,
            tie_breaker: None,
        }
    }

    pub fn with_tie_breaker(mut self, tie_breaker: Arc<dyn TieBreaker>) -> Self {
        self.tie_breaker = Some(tie_breaker);
        self
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Decide the operation for `candidate` given its retrieved matches
    ///
    /// Never mutates anything; matches pointing at codes that are no longer
    /// live are ignored.
    pub async fn decide(
        &self,
        candidate: Candidate,
        mut matches: Vec<SimilarityMatch>,
        codebook: &Codebook,
    ) -> Decision {
        matches.retain(|m| codebook.get(m.code_id).is_some());

        let Some(top) = matches.first().copied() else {
            let (confidence, rationale) = if candidate.has_embedding() {
                (1.0, "No similar codes found".to_string())
            } else {
                (
                    BLIND_CREATE_CONFIDENCE,
                    "Candidate has no embedding; created without similarity search".to_string(),
                )
            };
            return self.finish(Operation::CreateCode { candidate }, confidence, rationale, matches, false);
        };

        if top.score < self.config.similarity_threshold {
            let rationale = format!(
                "Top match {} scored {:.3}, below similarity threshold {:.3}",
                top.code_id, top.score, self.config.similarity_threshold
            );
            return self.finish(
                Operation::NoAction {
                    candidate,
                    reason: NoActionReason::BelowActionThreshold,
                },
                top.score,
                rationale,
                matches,
                false,
            );
        }

        let Some(target) = codebook.get(top.code_id) else {
            // retain() above keeps only live codes
            return self.finish(Operation::CreateCode { candidate }, top.score, String::new(), matches, false);
        };

        if target.function != candidate.function {
            return self.resolve_conflict(candidate, top, matches, codebook).await;
        }

        if top.score >= self.config.merge_threshold {
            let rationale = format!(
                "Similarity {:.3} with code {} at or above merge threshold {:.3}",
                top.score, top.code_id, self.config.merge_threshold
            );
            return self.finish(
                Operation::MergeCodes {
                    candidate,
                    target_id: top.code_id,
                },
                top.score,
                rationale,
                matches,
                false,
            );
        }

        let new_evidence = target.new_evidence_count(&candidate.evidence);
        if new_evidence == 0 {
            let rationale = format!(
                "Code {} already holds all evidence of the candidate",
                top.code_id
            );
            return self.finish(
                Operation::NoAction {
                    candidate,
                    reason: NoActionReason::DuplicateEvidence,
                },
                top.score,
                rationale,
                matches,
                false,
            );
        }

        let rationale = format!(
            "Similarity {:.3} with code {}; adding {} new evidence entr{}",
            top.score,
            top.code_id,
            new_evidence,
            if new_evidence == 1 { "y" } else { "ies" }
        );
        self.finish(
            Operation::UpdateCode {
                candidate,
                target_id: top.code_id,
                fields_changed: FieldChanges::default(),
            },
            top.score,
            rationale,
            matches,
            false,
        )
    }

    async fn resolve_conflict(
        &self,
        candidate: Candidate,
        top: SimilarityMatch,
        matches: Vec<SimilarityMatch>,
        codebook: &Codebook,
    ) -> Decision {
        let ambiguous = |candidate: Candidate, rationale: String, matches| {
            self.finish(
                Operation::NoAction {
                    candidate,
                    reason: NoActionReason::AmbiguousFunctionConflict,
                },
                top.score,
                rationale,
                matches,
                false,
            )
        };

        let (Some(tie_breaker), Some(target)) = (&self.tie_breaker, codebook.get(top.code_id)) else {
            return ambiguous(
                candidate,
                format!(
                    "Code {} is similar ({:.3}) but has a different function; no tie-breaker configured",
                    top.code_id, top.score
                ),
                matches,
            );
        };

        let verdict = match tie_breaker.resolve(target, &candidate).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(
                    candidate = %candidate.name,
                    code_id = top.code_id.0,
                    error = %e,
                    "Tie-break failed, leaving function conflict unresolved"
                );
                return ambiguous(
                    candidate,
                    format!("Function conflict with code {}; tie-break failed: {}", top.code_id, e),
                    matches,
                );
            }
        };

        let confidence = top.score.min(verdict.confidence);
        let rationale = format!(
            "Function conflict with code {} resolved by tie-break: {}",
            top.code_id, verdict.reasoning
        );
        let operation = match verdict.choice {
            TieBreakChoice::Merge => Operation::MergeCodes {
                candidate,
                target_id: top.code_id,
            },
            TieBreakChoice::Update { new_name, function } => {
                let fields_changed = FieldChanges {
                    name: new_name.filter(|name| name.trim() != target.name),
                    function: function.filter(|function| *function != target.function),
                };
                if fields_changed.is_empty() && target.new_evidence_count(&candidate.evidence) == 0 {
                    // Nothing to write; an empty update would only bump the version
                    Operation::NoAction {
                        candidate,
                        reason: NoActionReason::DuplicateEvidence,
                    }
                } else {
                    Operation::UpdateCode {
                        candidate,
                        target_id: top.code_id,
                        fields_changed,
                    }
                }
            }
            TieBreakChoice::CreateNew => Operation::CreateCode { candidate },
            TieBreakChoice::NoAction => Operation::NoAction {
                candidate,
                reason: NoActionReason::AssistedNoAction,
            },
            TieBreakChoice::Unresolved => {
                return ambiguous(
                    candidate,
                    format!("Function conflict with code {}; tie-break unresolved", top.code_id),
                    matches,
                );
            }
        };

        self.finish(operation, confidence, rationale, matches, true)
    }

    fn finish(
        &self,
        operation: Operation,
        confidence: f32,
        rationale: String,
        matches: Vec<SimilarityMatch>,
        assisted: bool,
    ) -> Decision {
        let confidence = confidence.clamp(0.0, 1.0);
        let requires_review = confidence < self.config.confidence_floor;

        debug!(
            candidate = %operation.candidate().name,
            operation = operation.kind().as_str(),
            confidence,
            assisted,
            requires_review,
            "Decided candidate"
        );

        Decision {
            operation,
            confidence,
            rationale,
            matches,
            assisted,
            requires_review,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CodebookError, CodebookResult};
    use crate::framework::ResearchFramework;
    use crate::tie_break::TieBreakVerdict;
    use crate::types::{CodeId, Evidence, OperationKind};
    use async_trait::async_trait;

    struct FixedTieBreaker(Option<TieBreakVerdict>);

    #[async_trait]
    impl TieBreaker for FixedTieBreaker {
        async fn resolve(
            &self,
            _existing: &crate::types::Code,
            _candidate: &Candidate,
        ) -> CodebookResult<TieBreakVerdict> {
            self.0.clone().ok_or(CodebookError::GenerationFailure {
                attempts: 1,
                message: "forced".to_string(),
            })
        }
    }

    fn candidate(function: &str, quotes: &[(u64, &str)], embedded: bool) -> Candidate {
        Candidate {
            name: "Candidate".to_string(),
            function: ResearchFramework::entman().function_set().parse(function).unwrap(),
            evidence: quotes.iter().map(|(a, q)| Evidence::new(*a, *q)).collect(),
            explanation: None,
            embedding: embedded.then(|| vec![1.0, 0.0]),
        }
    }

    fn codebook() -> Codebook {
        let mut codebook = Codebook::new(2, ResearchFramework::entman().function_set());
        codebook
            .apply(&Operation::CreateCode {
                candidate: candidate("PROBLEM_DEFINITION", &[(1, "q1")], true),
            })
            .unwrap();
        codebook
    }

    fn top(score: f32) -> Vec<SimilarityMatch> {
        vec![SimilarityMatch {
            code_id: CodeId(1),
            score,
        }]
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(DecisionConfig {
            similarity_threshold: 0.8,
            merge_threshold: 0.95,
            confidence_floor: 0.6,
        })
    }

    #[tokio::test]
    async fn test_no_matches_creates() {
        let decision = engine()
            .decide(candidate("PROBLEM_DEFINITION", &[(2, "q")], true), vec![], &codebook())
            .await;
        assert_eq!(decision.operation.kind(), OperationKind::CreateCode);
        assert_eq!(decision.confidence, 1.0);
        assert!(!decision.requires_review);
    }

    #[tokio::test]
    async fn test_blind_create_confidence() {
        let decision = engine()
            .decide(candidate("PROBLEM_DEFINITION", &[(2, "q")], false), vec![], &codebook())
            .await;
        assert_eq!(decision.operation.kind(), OperationKind::CreateCode);
        assert_eq!(decision.confidence, BLIND_CREATE_CONFIDENCE);
        assert!(decision.requires_review);
    }

    #[tokio::test]
    async fn test_below_threshold_is_no_action() {
        let decision = engine()
            .decide(candidate("PROBLEM_DEFINITION", &[(2, "q")], true), top(0.5), &codebook())
            .await;
        assert!(matches!(
            decision.operation,
            Operation::NoAction {
                reason: NoActionReason::BelowActionThreshold,
                ..
            }
        ));
        assert!(decision.requires_review);
    }

    #[tokio::test]
    async fn test_merge_and_update_bands() {
        let cb = codebook();
        let merge = engine()
            .decide(candidate("PROBLEM_DEFINITION", &[(2, "q")], true), top(0.97), &cb)
            .await;
        assert!(matches!(
            merge.operation,
            Operation::MergeCodes { target_id: CodeId(1), .. }
        ));
        assert_eq!(merge.confidence, 0.97);

        let update = engine()
            .decide(candidate("PROBLEM_DEFINITION", &[(2, "q")], true), top(0.85), &cb)
            .await;
        match update.operation {
            Operation::UpdateCode {
                target_id,
                fields_changed,
                ..
            } => {
                assert_eq!(target_id, CodeId(1));
                assert!(fields_changed.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }

        let duplicate = engine()
            .decide(candidate("PROBLEM_DEFINITION", &[(1, "q1")], true), top(0.85), &cb)
            .await;
        assert!(matches!(
            duplicate.operation,
            Operation::NoAction {
                reason: NoActionReason::DuplicateEvidence,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_function_conflict_without_tie_breaker() {
        let decision = engine()
            .decide(candidate("MORAL_EVALUATION", &[(2, "q")], true), top(0.97), &codebook())
            .await;
        assert!(matches!(
            decision.operation,
            Operation::NoAction {
                reason: NoActionReason::AmbiguousFunctionConflict,
                ..
            }
        ));
        assert!(!decision.assisted);
    }

    #[tokio::test]
    async fn test_function_conflict_failed_tie_break() {
        let engine = engine().with_tie_breaker(Arc::new(FixedTieBreaker(None)));
        let decision = engine
            .decide(candidate("MORAL_EVALUATION", &[(2, "q")], true), top(0.85), &codebook())
            .await;
        assert!(matches!(
            decision.operation,
            Operation::NoAction {
                reason: NoActionReason::AmbiguousFunctionConflict,
                ..
            }
        ));
        assert_eq!(decision.confidence, 0.85);
    }

    #[tokio::test]
    async fn test_assisted_merge_takes_lower_confidence() {
        let engine = engine().with_tie_breaker(Arc::new(FixedTieBreaker(Some(TieBreakVerdict {
            choice: TieBreakChoice::Merge,
            confidence: 0.5,
            reasoning: "same concept".to_string(),
        }))));
        let decision = engine
            .decide(candidate("MORAL_EVALUATION", &[(2, "q")], true), top(0.9), &codebook())
            .await;

        assert_eq!(decision.operation.kind(), OperationKind::MergeCodes);
        assert!(decision.assisted);
        assert_eq!(decision.confidence, 0.5);
        assert!(decision.requires_review);
        assert!(decision.rationale.contains("same concept"));
    }

    #[tokio::test]
    async fn test_assisted_no_action_and_create_new() {
        let no_action = engine().with_tie_breaker(Arc::new(FixedTieBreaker(Some(TieBreakVerdict {
            choice: TieBreakChoice::NoAction,
            confidence: 0.9,
            reasoning: String::new(),
        }))));
        let decision = no_action
            .decide(candidate("MORAL_EVALUATION", &[(2, "q")], true), top(0.9), &codebook())
            .await;
        assert!(matches!(
            decision.operation,
            Operation::NoAction {
                reason: NoActionReason::AssistedNoAction,
                ..
            }
        ));

        let create = engine().with_tie_breaker(Arc::new(FixedTieBreaker(Some(TieBreakVerdict {
            choice: TieBreakChoice::CreateNew,
            confidence: 0.9,
            reasoning: String::new(),
        }))));
        let decision = create
            .decide(candidate("MORAL_EVALUATION", &[(2, "q")], true), top(0.9), &codebook())
            .await;
        assert_eq!(decision.operation.kind(), OperationKind::CreateCode);
        assert_eq!(decision.confidence, 0.9);
    }

    #[tokio::test]
    async fn test_assisted_update_without_changes_is_duplicate_evidence() {
        let cb = codebook();
        let existing_function = cb.get(CodeId(1)).unwrap().function.clone();
        let engine = engine().with_tie_breaker(Arc::new(FixedTieBreaker(Some(TieBreakVerdict {
            choice: TieBreakChoice::Update {
                new_name: Some("Candidate".to_string()),
                function: Some(existing_function),
            },
            confidence: 0.9,
            reasoning: String::new(),
        }))));

        // Evidence already on code 1, name and function unchanged
        let decision = engine
            .decide(candidate("MORAL_EVALUATION", &[(1, "q1")], true), top(0.9), &cb)
            .await;
        assert!(matches!(
            decision.operation,
            Operation::NoAction {
                reason: NoActionReason::DuplicateEvidence,
                ..
            }
        ));
        assert!(decision.assisted);

        // New evidence still updates, with the no-op fields dropped
        let decision = engine
            .decide(candidate("MORAL_EVALUATION", &[(2, "q2")], true), top(0.9), &cb)
            .await;
        match decision.operation {
            Operation::UpdateCode { fields_changed, .. } => assert!(fields_changed.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_match_is_ignored() {
        let decision = engine()
            .decide(
                candidate("PROBLEM_DEFINITION", &[(2, "q")], true),
                vec![SimilarityMatch {
                    code_id: CodeId(99),
                    score: 0.99,
                }],
                &codebook(),
            )
            .await;
        assert_eq!(decision.operation.kind(), OperationKind::CreateCode);
        assert!(decision.matches.is_empty());
    }
}
