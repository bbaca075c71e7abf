//! Error types for qcb-explore
//!
//! Capability failures (generation, embedding) degrade one candidate or one
//! article; apply-layer failures halt the current article. `is_apply_error`
//! lets the orchestrator tell the two apart.

use crate::types::CodeId;
use thiserror::Error;

/// Codebook engine error type
#[derive(Debug, Error)]
pub enum CodebookError {
    /// Text generation failed after all attempts
    #[error("Generation failed after {attempts} attempt(s): {message}")]
    GenerationFailure { attempts: u32, message: String },

    /// Embedding generation failed after all attempts
    #[error("Embedding failed: {0}")]
    EmbeddingFailure(String),

    /// Candidate or operation failed validation (empty name, unknown function)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Candidate carried no usable evidence
    #[error("Insufficient evidence: {0}")]
    InsufficientEvidence(String),

    /// Embedding vector length differs from the configured dimension
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Operation targets a code that is not live
    #[error("Unknown code: {0}")]
    UnknownCode(CodeId),

    /// Snapshot is malformed or inconsistent
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// qcb-common error
    #[error("Common error: {0}")]
    Common(#[from] qcb_common::Error),
}

impl CodebookError {
    /// True for errors raised by the apply layer (state is untouched)
    pub fn is_apply_error(&self) -> bool {
        matches!(
            self,
            CodebookError::UnknownCode(_)
                | CodebookError::DimensionMismatch { .. }
                | CodebookError::Validation(_)
                | CodebookError::InsufficientEvidence(_)
        )
    }
}

/// Result type for codebook engine operations
pub type CodebookResult<T> = Result<T, CodebookError>;
