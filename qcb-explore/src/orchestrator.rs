//! Exploration orchestrator: article stream → codebook mutations
//!
//! Generation and embedding for up to `prefetch_articles` upcoming articles
//! run ahead of the apply stage; similarity search, decisions, review and
//! applies stay strictly sequential in article order, then candidate order,
//! so later candidates see the effects of earlier ones.
//!
//! Cancellation is observed only between articles. The session is
//! checkpointed every `checkpoint_every_articles` articles and on stop.

use crate::articles::Article;
use crate::candidate_generator::{CandidateGenerator, GeneratedBatch};
use crate::codebook::Codebook;
use crate::decision::{Decision, DecisionEngine};
use crate::error::CodebookResult;
use crate::review::{AutoApprove, ReviewHook};
use crate::session::{LogOutcome, ProcessingSession};
use crate::similarity::SimilarityEngine;
use crate::snapshot::save_snapshot;
use crate::types::{AppliedResult, ArticleId, Candidate};
use chrono::Utc;
use futures::StreamExt;
use qcb_common::config::ExplorationConfig;
use qcb_common::events::{EventBus, ExplorationEvent};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Reason logged for candidates left over after an apply failure
pub const HALTED_REASON: &str = "article halted after apply failure";

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub similarity_k: usize,
    pub similarity_threshold: f32,
    /// Articles whose generation may run ahead of the apply stage
    pub prefetch_articles: usize,
    pub checkpoint_every_articles: u64,
    /// No checkpoints are written when unset
    pub checkpoint_path: Option<PathBuf>,
    /// Process at most this many pending articles
    pub max_articles: Option<usize>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &ExplorationConfig, checkpoint_path: Option<PathBuf>) -> Self {
        Self {
            similarity_k: config.similarity_k,
            similarity_threshold: config.similarity_threshold,
            prefetch_articles: config.prefetch_articles,
            checkpoint_every_articles: config.checkpoint_every_articles,
            checkpoint_path,
            max_articles: None,
        }
    }
}

/// Counters for one `run`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub session_id: Uuid,
    /// Articles skipped because an earlier run already processed them
    pub articles_resumed_past: usize,
    pub articles_processed: u64,
    /// Articles whose generation failed
    pub articles_failed: u64,
    pub created: u64,
    pub merged: u64,
    pub updated: u64,
    pub no_action: u64,
    pub reviewed: u64,
    pub candidates_skipped: u64,
    pub apply_failures: u64,
    pub checkpoints_saved: u64,
    pub codes_in_codebook: usize,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn operations_applied(&self) -> u64 {
        self.created + self.merged + self.updated + self.no_action
    }
}

pub struct ExplorationOrchestrator {
    generator: Arc<CandidateGenerator>,
    similarity: SimilarityEngine,
    decisions: DecisionEngine,
    review: Arc<dyn ReviewHook>,
    events: EventBus,
    settings: OrchestratorSettings,
}

impl ExplorationOrchestrator {
    pub fn new(
        generator: Arc<CandidateGenerator>,
        decisions: DecisionEngine,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            generator,
            similarity: SimilarityEngine::new(settings.similarity_k, settings.similarity_threshold),
            decisions,
            review: Arc::new(AutoApprove),
            events: EventBus::new(256),
            settings,
        }
    }

    pub fn with_review_hook(mut self, review: Arc<dyn ReviewHook>) -> Self {
        self.review = review;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Process `articles` against `codebook`, resuming `session`
    ///
    /// Only checkpoint write failures end the run with an error; generation
    /// and apply failures are logged and skipped.
    pub async fn run(
        &self,
        codebook: &mut Codebook,
        session: &mut ProcessingSession,
        mut articles: Vec<Article>,
        cancel: CancellationToken,
    ) -> CodebookResult<RunSummary> {
        articles.sort_by_key(|a| a.id);
        let total = articles.len();
        let resumed = session.last_article_id.is_some();

        let mut pending: Vec<Article> = articles
            .into_iter()
            .filter(|a| !session.is_processed(a.id))
            .collect();
        let articles_resumed_past = total - pending.len();
        if let Some(max) = self.settings.max_articles {
            pending.truncate(max);
        }

        let mut summary = RunSummary {
            session_id: session.session_id,
            articles_resumed_past,
            ..RunSummary::default()
        };

        info!(
            session_id = %session.session_id,
            resumed,
            last_article_id = ?session.last_article_id,
            articles_total = total,
            articles_pending = pending.len(),
            codes = codebook.len(),
            "Starting exploration"
        );
        self.events.emit_lossy(ExplorationEvent::SessionStarted {
            session_id: session.session_id,
            resumed,
            articles_total: total,
            codes_in_codebook: codebook.len(),
            timestamp: Utc::now(),
        });

        let generator = Arc::clone(&self.generator);
        let batches = futures::stream::iter(pending)
            .map(move |article| {
                let generator = Arc::clone(&generator);
                async move {
                    let generated = generator.generate(&article).await;
                    (article, generated)
                }
            })
            .buffered(self.settings.prefetch_articles.max(1));
        tokio::pin!(batches);

        let checkpoint_every = self.settings.checkpoint_every_articles.max(1);
        let mut since_checkpoint = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(session_id = %session.session_id, "Exploration cancelled at article boundary");
                    summary.cancelled = true;
                    break;
                }
                next = batches.next() => next,
            };
            let Some((article, generated)) = next else {
                break;
            };

            self.process_article(codebook, session, &article, generated, &mut summary)
                .await;

            since_checkpoint += 1;
            if since_checkpoint >= checkpoint_every {
                self.checkpoint(codebook, session, &mut summary)?;
                since_checkpoint = 0;
            }
        }

        if since_checkpoint > 0 || summary.cancelled {
            self.checkpoint(codebook, session, &mut summary)?;
        }

        summary.codes_in_codebook = codebook.len();
        info!(
            session_id = %session.session_id,
            articles_processed = summary.articles_processed,
            articles_failed = summary.articles_failed,
            created = summary.created,
            merged = summary.merged,
            updated = summary.updated,
            no_action = summary.no_action,
            apply_failures = summary.apply_failures,
            codes = summary.codes_in_codebook,
            cancelled = summary.cancelled,
            "Exploration finished"
        );
        self.events.emit_lossy(ExplorationEvent::SessionFinished {
            session_id: session.session_id,
            articles_processed: session.articles_processed,
            codes_in_codebook: codebook.len(),
            cancelled: summary.cancelled,
            timestamp: Utc::now(),
        });

        Ok(summary)
    }

    async fn process_article(
        &self,
        codebook: &mut Codebook,
        session: &mut ProcessingSession,
        article: &Article,
        generated: CodebookResult<GeneratedBatch>,
        summary: &mut RunSummary,
    ) {
        let batch = match generated {
            Ok(batch) => batch,
            Err(e) => {
                warn!(article_id = article.id, error = %e, "Skipping article: generation failed");
                self.skip_article(session, article.id, e.to_string());
                summary.articles_failed += 1;
                self.finish_article(codebook, session, article.id, 0, 0, summary);
                return;
            }
        };

        self.events.emit_lossy(ExplorationEvent::ArticleStarted {
            session_id: session.session_id,
            article_id: article.id,
            title: article.title.clone(),
            candidates: batch.candidates.len(),
            timestamp: Utc::now(),
        });

        let mut skipped = 0usize;
        for rejected in &batch.rejected {
            warn!(
                article_id = article.id,
                index = rejected.index,
                candidate = %rejected.name,
                error = %rejected.error,
                "Candidate rejected by validation"
            );
            self.skip_candidate(session, article.id, rejected.index, &rejected.name, &rejected.error);
            skipped += 1;
        }

        if batch.candidates.is_empty() {
            self.skip_article(session, article.id, "no valid candidates".to_string());
        }

        let mut applied = 0usize;
        let mut halted = false;
        for (index, candidate) in batch.candidates.into_iter().enumerate() {
            if halted {
                self.skip_candidate(session, article.id, index, &candidate.name, HALTED_REASON);
                skipped += 1;
                continue;
            }

            let ok = self
                .decide_and_apply(codebook, session, article.id, index, candidate, summary)
                .await;
            if ok {
                applied += 1;
            } else {
                halted = true;
                skipped += 1;
            }
        }

        summary.candidates_skipped += skipped as u64;
        self.finish_article(codebook, session, article.id, applied, skipped, summary);
    }

    /// Returns false when the apply layer rejected the operation
    async fn decide_and_apply(
        &self,
        codebook: &mut Codebook,
        session: &mut ProcessingSession,
        article_id: ArticleId,
        index: usize,
        candidate: Candidate,
        summary: &mut RunSummary,
    ) -> bool {
        let name = candidate.name.clone();
        let matches = self.similarity.find_similar(&candidate, codebook);
        let Decision {
            operation,
            confidence,
            rationale,
            matches,
            assisted,
            requires_review,
        } = self.decisions.decide(candidate, matches, codebook).await;

        self.events.emit_lossy(ExplorationEvent::CandidateDecided {
            session_id: session.session_id,
            article_id,
            candidate_index: index,
            candidate_name: name.clone(),
            operation: operation.kind().to_string(),
            confidence,
            assisted,
            requires_review,
            timestamp: Utc::now(),
        });

        let operation = if requires_review {
            let candidate = operation.candidate().clone();
            let decided = operation.kind();
            let reviewed = self.review.review(operation, &candidate, &matches).await;
            if reviewed.kind() != decided {
                info!(
                    article_id,
                    candidate = %name,
                    decided = decided.as_str(),
                    reviewed = reviewed.kind().as_str(),
                    "Review changed operation"
                );
            }
            summary.reviewed += 1;
            reviewed
        } else {
            operation
        };

        match codebook.apply(&operation) {
            Ok(result) => {
                debug!(
                    article_id,
                    candidate = %name,
                    operation = operation.kind().as_str(),
                    confidence,
                    code_id = ?result.code_id(),
                    "Applied operation"
                );
                match &result {
                    AppliedResult::Created { .. } => summary.created += 1,
                    AppliedResult::Merged { .. } => summary.merged += 1,
                    AppliedResult::Updated { .. } => summary.updated += 1,
                    AppliedResult::NoAction { .. } => summary.no_action += 1,
                }

                self.events.emit_lossy(ExplorationEvent::OperationApplied {
                    session_id: session.session_id,
                    article_id,
                    candidate_index: index,
                    operation: operation.kind().to_string(),
                    code_id: result.code_id().map(|id| id.0),
                    version: result.version(),
                    timestamp: Utc::now(),
                });
                session.record(
                    article_id,
                    Some((index, &name)),
                    LogOutcome::Applied {
                        operation: operation.without_embedding(),
                        result,
                        confidence,
                        rationale,
                        assisted,
                        reviewed: requires_review,
                    },
                );
                true
            }
            Err(e) => {
                error!(
                    article_id,
                    candidate = %name,
                    operation = operation.kind().as_str(),
                    target_id = ?operation.target_id(),
                    error = %e,
                    "Apply failed, halting article"
                );
                summary.apply_failures += 1;

                self.events.emit_lossy(ExplorationEvent::CandidateSkipped {
                    session_id: session.session_id,
                    article_id,
                    candidate_index: index,
                    candidate_name: name.clone(),
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                session.record(
                    article_id,
                    Some((index, &name)),
                    LogOutcome::ApplyFailed {
                        operation: operation.kind().to_string(),
                        error: e.to_string(),
                    },
                );
                false
            }
        }
    }

    fn skip_candidate(
        &self,
        session: &mut ProcessingSession,
        article_id: ArticleId,
        index: usize,
        name: &str,
        reason: &str,
    ) {
        session.record_candidate_skipped(article_id, index, name, reason);
        self.events.emit_lossy(ExplorationEvent::CandidateSkipped {
            session_id: session.session_id,
            article_id,
            candidate_index: index,
            candidate_name: name.to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn skip_article(&self, session: &mut ProcessingSession, article_id: ArticleId, reason: String) {
        self.events.emit_lossy(ExplorationEvent::ArticleSkipped {
            session_id: session.session_id,
            article_id,
            reason: reason.clone(),
            timestamp: Utc::now(),
        });
        session.record_article_skipped(article_id, reason);
    }

    fn finish_article(
        &self,
        codebook: &Codebook,
        session: &mut ProcessingSession,
        article_id: ArticleId,
        applied: usize,
        skipped: usize,
        summary: &mut RunSummary,
    ) {
        session.mark_article_processed(article_id);
        summary.articles_processed += 1;

        info!(
            article_id,
            applied,
            skipped,
            codes = codebook.len(),
            articles_processed = session.articles_processed,
            "Article completed"
        );
        self.events.emit_lossy(ExplorationEvent::ArticleCompleted {
            session_id: session.session_id,
            article_id,
            applied,
            skipped,
            codes_in_codebook: codebook.len(),
            articles_processed: session.articles_processed,
            timestamp: Utc::now(),
        });
    }

    fn checkpoint(
        &self,
        codebook: &Codebook,
        session: &ProcessingSession,
        summary: &mut RunSummary,
    ) -> CodebookResult<()> {
        let Some(path) = &self.settings.checkpoint_path else {
            return Ok(());
        };

        save_snapshot(path, codebook, session)?;
        summary.checkpoints_saved += 1;
        self.events.emit_lossy(ExplorationEvent::CheckpointSaved {
            session_id: session.session_id,
            articles_processed: session.articles_processed,
            path: path.display().to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
