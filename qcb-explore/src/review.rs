//! Human-review interception point
//!
//! Decisions flagged `requires_review` pass through a `ReviewHook` before the
//! apply layer. A hook may return the operation unchanged, edit it, or replace
//! it with a different variant.

use crate::types::{Candidate, NoActionReason, Operation, SimilarityMatch};
use async_trait::async_trait;
use std::str::FromStr;
use tracing::info;

#[async_trait]
pub trait ReviewHook: Send + Sync {
    async fn review(
        &self,
        operation: Operation,
        candidate: &Candidate,
        matches: &[SimilarityMatch],
    ) -> Operation;
}

/// Identity pass-through
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ReviewHook for AutoApprove {
    async fn review(
        &self,
        operation: Operation,
        _candidate: &Candidate,
        _matches: &[SimilarityMatch],
    ) -> Operation {
        operation
    }
}

/// Rejects every low-confidence mutation
#[derive(Debug, Clone, Copy, Default)]
pub struct ConservativeReviewer;

#[async_trait]
impl ReviewHook for ConservativeReviewer {
    async fn review(
        &self,
        operation: Operation,
        _candidate: &Candidate,
        _matches: &[SimilarityMatch],
    ) -> Operation {
        if matches!(operation, Operation::NoAction { .. }) {
            return operation;
        }

        info!(
            candidate = %operation.candidate().name,
            operation = operation.kind().as_str(),
            "Review rejected low-confidence operation"
        );
        Operation::NoAction {
            candidate: operation.into_candidate(),
            reason: NoActionReason::RejectedInReview,
        }
    }
}

/// Built-in review policies selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReviewPolicy {
    #[default]
    Auto,
    Conservative,
}

impl ReviewPolicy {
    pub fn hook(self) -> std::sync::Arc<dyn ReviewHook> {
        match self {
            ReviewPolicy::Auto => std::sync::Arc::new(AutoApprove),
            ReviewPolicy::Conservative => std::sync::Arc::new(ConservativeReviewer),
        }
    }
}

impl FromStr for ReviewPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ReviewPolicy::Auto),
            "conservative" => Ok(ReviewPolicy::Conservative),
            other => Err(format!(
                "Unknown review policy '{}' (expected auto or conservative)",
                other
            )),
        }
    }
}
