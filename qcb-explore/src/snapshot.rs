//! Codebook snapshot persistence
//!
//! JSON document holding the codebook and its processing session:
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "embedding_dimension": 1536,
//!   "next_id": 4,
//!   "codes": [ ... ],
//!   "retired": [ {"id": 2, ..., "reason": {"kind": "merged", "into": 1}} ],
//!   "session": { ... },
//!   "saved_at": "2024-01-01T00:00:00Z"
//! }
//! ```
//!
//! Saving writes a temp file and renames it over the target. Loading checks
//! function labels against the active framework, id ranges, vector lengths
//! and live/retired collisions.

use crate::codebook::{Codebook, RetiredCode};
use crate::error::{CodebookError, CodebookResult};
use crate::framework::FunctionSet;
use crate::session::ProcessingSession;
use crate::types::Code;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodebookSnapshot {
    pub format_version: u32,
    pub embedding_dimension: usize,
    pub next_id: u64,
    pub codes: Vec<Code>,
    pub retired: Vec<RetiredCode>,
    pub session: ProcessingSession,
    pub saved_at: DateTime<Utc>,
}

impl CodebookSnapshot {
    pub fn capture(codebook: &Codebook, session: &ProcessingSession) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            embedding_dimension: codebook.embedding_store().dimension(),
            next_id: codebook.next_id().0,
            codes: codebook.codes().cloned().collect(),
            retired: codebook.retired().cloned().collect(),
            session: session.clone(),
            saved_at: Utc::now(),
        }
    }

    /// Validate and rebuild the codebook and session
    pub fn restore(self, functions: &FunctionSet) -> CodebookResult<(Codebook, ProcessingSession)> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(CodebookError::Snapshot(format!(
                "Unsupported format_version {} (expected {})",
                self.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        if self.embedding_dimension == 0 {
            return Err(CodebookError::Snapshot(
                "embedding_dimension must be at least 1".to_string(),
            ));
        }

        let codebook = Codebook::from_parts(
            self.next_id,
            self.codes,
            self.retired,
            self.embedding_dimension,
            functions.clone(),
        )?;
        Ok((codebook, self.session))
    }
}

pub fn to_json_string(codebook: &Codebook, session: &ProcessingSession) -> CodebookResult<String> {
    let snapshot = CodebookSnapshot::capture(codebook, session);
    Ok(serde_json::to_string_pretty(&snapshot)?)
}

pub fn from_json_str(
    content: &str,
    functions: &FunctionSet,
) -> CodebookResult<(Codebook, ProcessingSession)> {
    let snapshot: CodebookSnapshot = serde_json::from_str(content)
        .map_err(|e| CodebookError::Snapshot(format!("Malformed snapshot: {}", e)))?;
    snapshot.restore(functions)
}

/// Persist codebook and session atomically
pub fn save_snapshot(
    path: &Path,
    codebook: &Codebook,
    session: &ProcessingSession,
) -> CodebookResult<()> {
    let content = to_json_string(codebook, session)?;
    qcb_common::config::write_atomic(path, content.as_bytes())?;

    info!(
        path = %path.display(),
        codes = codebook.len(),
        retired = codebook.retired().count(),
        articles_processed = session.articles_processed,
        "Saved codebook snapshot"
    );
    Ok(())
}

pub fn load_snapshot(
    path: &Path,
    functions: &FunctionSet,
) -> CodebookResult<(Codebook, ProcessingSession)> {
    let content = std::fs::read_to_string(path)?;
    let (codebook, session) = from_json_str(&content, functions)?;

    info!(
        path = %path.display(),
        codes = codebook.len(),
        session_id = %session.session_id,
        last_article_id = ?session.last_article_id,
        "Loaded codebook snapshot"
    );
    Ok((codebook, session))
}
