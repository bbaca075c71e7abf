//! Processing session: progress marker and ordered decision log
//!
//! The session travels with the codebook in every checkpoint. An interrupted
//! run resumes at the first article whose id is greater than
//! `last_article_id`.

use crate::types::{AppliedResult, ArticleId, Operation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to one candidate or article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LogOutcome {
    /// Operation applied to the codebook (embedding stripped)
    Applied {
        operation: Operation,
        result: AppliedResult,
        confidence: f32,
        rationale: String,
        /// Decided through the AI-assisted tie-break
        assisted: bool,
        /// Passed through the review hook
        reviewed: bool,
    },
    /// Candidate never reached the apply layer
    CandidateSkipped { reason: String },
    /// Apply layer rejected the operation; the rest of the article was skipped
    ApplyFailed { operation: String, error: String },
    /// Article produced no candidates to decide on
    ArticleSkipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLogEntry {
    /// Position in the log, starting at 0
    pub sequence: u64,
    pub article_id: ArticleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_name: Option<String>,
    #[serde(flatten)]
    pub outcome: LogOutcome,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSession {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub articles_processed: u64,
    pub last_article_id: Option<ArticleId>,
    pub log: Vec<SessionLogEntry>,
}

impl Default for ProcessingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingSession {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            articles_processed: 0,
            last_article_id: None,
            log: Vec::new(),
        }
    }

    /// Append an entry to the log
    pub fn record(
        &mut self,
        article_id: ArticleId,
        candidate: Option<(usize, &str)>,
        outcome: LogOutcome,
    ) -> &SessionLogEntry {
        let entry = SessionLogEntry {
            sequence: self.log.len() as u64,
            article_id,
            candidate_index: candidate.map(|(index, _)| index),
            candidate_name: candidate.map(|(_, name)| name.to_string()),
            outcome,
            recorded_at: Utc::now(),
        };
        self.log.push(entry);
        &self.log[self.log.len() - 1]
    }

    pub fn record_candidate_skipped(
        &mut self,
        article_id: ArticleId,
        candidate_index: usize,
        candidate_name: &str,
        reason: impl Into<String>,
    ) {
        self.record(
            article_id,
            Some((candidate_index, candidate_name)),
            LogOutcome::CandidateSkipped {
                reason: reason.into(),
            },
        );
    }

    pub fn record_article_skipped(&mut self, article_id: ArticleId, reason: impl Into<String>) {
        self.record(
            article_id,
            None,
            LogOutcome::ArticleSkipped {
                reason: reason.into(),
            },
        );
    }

    /// Advance the resume marker past `article_id`
    pub fn mark_article_processed(&mut self, article_id: ArticleId) {
        self.articles_processed += 1;
        self.last_article_id = Some(article_id);
    }

    /// True when a resumed run must skip this article
    pub fn is_processed(&self, article_id: ArticleId) -> bool {
        self.last_article_id
            .map_or(false, |last| article_id <= last)
    }

    /// Log entries recorded for one article, in order
    pub fn entries_for_article(
        &self,
        article_id: ArticleId,
    ) -> impl Iterator<Item = &SessionLogEntry> + '_ {
        self.log.iter().filter(move |e| e.article_id == article_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_empty() {
        let session = ProcessingSession::new();
        assert_eq!(session.articles_processed, 0);
        assert!(session.last_article_id.is_none());
        assert!(!session.is_processed(0));
    }

    #[test]
    fn test_resume_marker() {
        let mut session = ProcessingSession::new();
        session.mark_article_processed(3);
        session.mark_article_processed(7);

        assert_eq!(session.articles_processed, 2);
        assert!(session.is_processed(5));
        assert!(session.is_processed(7));
        assert!(!session.is_processed(8));
    }

    #[test]
    fn test_log_sequence_and_filtering() {
        let mut session = ProcessingSession::new();
        session.record_article_skipped(1, "generation failed");
        session.record_candidate_skipped(2, 0, "Blame", "no evidence");
        session.record_candidate_skipped(2, 1, "Cost", "unknown function");

        let sequences: Vec<u64> = session.log.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(session.entries_for_article(2).count(), 2);
        assert_eq!(session.log[1].candidate_name.as_deref(), Some("Blame"));
    }

    #[test]
    fn test_log_entry_serialization_is_flat() {
        let mut session = ProcessingSession::new();
        session.record_candidate_skipped(4, 2, "Blame", "no evidence");

        let json = serde_json::to_value(&session.log[0]).unwrap();
        assert_eq!(json["outcome"], "candidate_skipped");
        assert_eq!(json["reason"], "no evidence");
        assert_eq!(json["candidate_index"], 2);

        let back: SessionLogEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, session.log[0]);
    }
}
