//! Core data model for the codebook evolution engine
//!
//! Codes, candidates, evidence and the closed set of operations that can
//! mutate a codebook.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Article identifier as supplied by the article source
pub type ArticleId = u64;

/// Stable code identifier
///
/// Assigned once at creation from a monotonic counter and never reused, even
/// after the code is merged away or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeId(pub u64);

impl fmt::Display for CodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Analytical function label from the research framework
///
/// Constructed only through [`crate::framework::FunctionSet::parse`], so a
/// label outside the configured enumeration cannot reach the codebook.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Function(String);

impl Function {
    pub(crate) fn from_validated(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Evidence, Code, Candidate
// ============================================================================

/// Supporting quote tied to a source article
///
/// Equality is tuple equality, which is what evidence deduplication uses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Evidence {
    pub article_id: ArticleId,
    pub quote: String,
}

impl Evidence {
    pub fn new(article_id: ArticleId, quote: impl Into<String>) -> Self {
        Self {
            article_id,
            quote: quote.into(),
        }
    }
}

/// Committed codebook entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    pub id: CodeId,
    pub name: String,
    pub function: Function,
    /// Order of discovery; never contains duplicates
    pub evidence: Vec<Evidence>,
    /// None until generated; never partial
    pub embedding: Option<Vec<f32>>,
    /// 0 at creation, +1 per merge or update
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Code {
    /// Number of distinct entries in `evidence` not already on this code
    pub fn new_evidence_count(&self, evidence: &[Evidence]) -> usize {
        let mut seen: Vec<&Evidence> = self.evidence.iter().collect();
        let mut count = 0;
        for e in evidence {
            if !seen.contains(&e) {
                seen.push(e);
                count += 1;
            }
        }
        count
    }
}

/// Unconfirmed code proposed from one article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub function: Function,
    pub evidence: Vec<Evidence>,
    /// Generator's explanation of why the code applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Candidate {
    /// Text the embedding is computed from: name, function label, then quotes
    pub fn canonical_text(&self) -> String {
        let mut lines = Vec::with_capacity(self.evidence.len() + 2);
        lines.push(self.name.as_str());
        lines.push(self.function.as_str());
        lines.extend(self.evidence.iter().map(|e| e.quote.as_str()));
        lines.join("\n")
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }
}

/// One retrieved neighbour of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatch {
    pub code_id: CodeId,
    pub score: f32,
}

// ============================================================================
// Operations
// ============================================================================

/// Field edits carried by an UPDATE
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<Function>,
}

impl FieldChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.function.is_none()
    }
}

/// Why a candidate was not folded into the codebook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoActionReason {
    /// Top match scored below the similarity threshold
    BelowActionThreshold,
    /// Candidate brings no evidence the target lacks
    DuplicateEvidence,
    /// Top match has a different function and the conflict could not be resolved
    AmbiguousFunctionConflict,
    /// Assisted tie-break chose to do nothing
    AssistedNoAction,
    /// Review hook rejected the operation
    RejectedInReview,
}

impl NoActionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoActionReason::BelowActionThreshold => "below_action_threshold",
            NoActionReason::DuplicateEvidence => "duplicate_evidence",
            NoActionReason::AmbiguousFunctionConflict => "ambiguous_function_conflict",
            NoActionReason::AssistedNoAction => "assisted_no_action",
            NoActionReason::RejectedInReview => "rejected_in_review",
        }
    }
}

impl fmt::Display for NoActionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of codebook mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    CreateCode {
        candidate: Candidate,
    },
    MergeCodes {
        candidate: Candidate,
        target_id: CodeId,
    },
    UpdateCode {
        candidate: Candidate,
        target_id: CodeId,
        #[serde(default)]
        fields_changed: FieldChanges,
    },
    NoAction {
        candidate: Candidate,
        reason: NoActionReason,
    },
}

/// Discriminant of [`Operation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CreateCode,
    MergeCodes,
    UpdateCode,
    NoAction,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateCode => "CREATE_CODE",
            OperationKind::MergeCodes => "MERGE_CODES",
            OperationKind::UpdateCode => "UPDATE_CODE",
            OperationKind::NoAction => "NO_ACTION",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::CreateCode { .. } => OperationKind::CreateCode,
            Operation::MergeCodes { .. } => OperationKind::MergeCodes,
            Operation::UpdateCode { .. } => OperationKind::UpdateCode,
            Operation::NoAction { .. } => OperationKind::NoAction,
        }
    }

    pub fn candidate(&self) -> &Candidate {
        match self {
            Operation::CreateCode { candidate }
            | Operation::MergeCodes { candidate, .. }
            | Operation::UpdateCode { candidate, .. }
            | Operation::NoAction { candidate, .. } => candidate,
        }
    }

    pub fn into_candidate(self) -> Candidate {
        match self {
            Operation::CreateCode { candidate }
            | Operation::MergeCodes { candidate, .. }
            | Operation::UpdateCode { candidate, .. }
            | Operation::NoAction { candidate, .. } => candidate,
        }
    }

    /// Code the operation modifies (MERGE/UPDATE only)
    pub fn target_id(&self) -> Option<CodeId> {
        match self {
            Operation::MergeCodes { target_id, .. } | Operation::UpdateCode { target_id, .. } => {
                Some(*target_id)
            }
            _ => None,
        }
    }

    /// Copy with the candidate's embedding dropped, for session log records
    pub fn without_embedding(&self) -> Operation {
        let mut op = self.clone();
        match &mut op {
            Operation::CreateCode { candidate }
            | Operation::MergeCodes { candidate, .. }
            | Operation::UpdateCode { candidate, .. }
            | Operation::NoAction { candidate, .. } => candidate.embedding = None,
        }
        op
    }
}

/// Outcome of a successful `Codebook::apply`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppliedResult {
    Created {
        id: CodeId,
    },
    Merged {
        target_id: CodeId,
        version: u32,
        evidence_added: usize,
        function_changed: bool,
    },
    Updated {
        target_id: CodeId,
        version: u32,
        evidence_added: usize,
        name_changed: bool,
        function_changed: bool,
    },
    NoAction {
        reason: NoActionReason,
    },
}

impl AppliedResult {
    /// Code created or modified
    pub fn code_id(&self) -> Option<CodeId> {
        match self {
            AppliedResult::Created { id } => Some(*id),
            AppliedResult::Merged { target_id, .. } | AppliedResult::Updated { target_id, .. } => {
                Some(*target_id)
            }
            AppliedResult::NoAction { .. } => None,
        }
    }

    /// Code version after the apply
    pub fn version(&self) -> Option<u32> {
        match self {
            AppliedResult::Created { .. } => Some(0),
            AppliedResult::Merged { version, .. } | AppliedResult::Updated { version, .. } => {
                Some(*version)
            }
            AppliedResult::NoAction { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> Candidate {
        Candidate {
            name: "Economic cost".to_string(),
            function: Function::from_validated("PROBLEM_DEFINITION"),
            evidence: vec![
                Evidence::new(1, "prices rose sharply"),
                Evidence::new(1, "households cut spending"),
            ],
            explanation: None,
            embedding: Some(vec![1.0, 0.0]),
        }
    }

    #[test]
    fn test_canonical_text_order() {
        assert_eq!(
            candidate().canonical_text(),
            "Economic cost\nPROBLEM_DEFINITION\nprices rose sharply\nhouseholds cut spending"
        );
    }

    #[test]
    fn test_operation_serializes_with_kind_tag() {
        let op = Operation::NoAction {
            candidate: candidate(),
            reason: NoActionReason::AmbiguousFunctionConflict,
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "NO_ACTION");
        assert_eq!(json["reason"], "ambiguous_function_conflict");
        assert_eq!(op.kind().as_str(), "NO_ACTION");

        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_without_embedding_strips_vector_only() {
        let op = Operation::MergeCodes {
            candidate: candidate(),
            target_id: CodeId(3),
        };
        let stripped = op.without_embedding();
        assert!(stripped.candidate().embedding.is_none());
        assert_eq!(stripped.candidate().name, "Economic cost");
        assert_eq!(stripped.target_id(), Some(CodeId(3)));
        assert!(op.candidate().embedding.is_some());
    }

    #[test]
    fn test_new_evidence_count_ignores_duplicates() {
        let now = Utc::now();
        let code = Code {
            id: CodeId(1),
            name: "Economic cost".to_string(),
            function: Function::from_validated("PROBLEM_DEFINITION"),
            evidence: vec![Evidence::new(1, "prices rose sharply")],
            embedding: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let incoming = vec![
            Evidence::new(1, "prices rose sharply"),
            Evidence::new(2, "prices rose sharply"),
            Evidence::new(2, "prices rose sharply"),
        ];
        assert_eq!(code.new_evidence_count(&incoming), 1);
    }

    #[test]
    fn test_no_action_reason_strings() {
        assert_eq!(
            serde_json::to_string(&NoActionReason::BelowActionThreshold).unwrap(),
            "\"below_action_threshold\""
        );
        assert_eq!(NoActionReason::RejectedInReview.to_string(), "rejected_in_review");
    }

    #[test]
    fn test_applied_result_accessors() {
        let created = AppliedResult::Created { id: CodeId(4) };
        assert_eq!(created.code_id(), Some(CodeId(4)));
        assert_eq!(created.version(), Some(0));

        let none = AppliedResult::NoAction {
            reason: NoActionReason::DuplicateEvidence,
        };
        assert_eq!(none.code_id(), None);
    }
}
