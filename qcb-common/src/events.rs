//! Event types for the exploration event system
//!
//! Provides the exploration event definitions and the broadcast EventBus
//! shared by the engine and anything observing it (CLI progress output, a
//! review UI).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Exploration progress events
///
/// Events are broadcast via EventBus and serialize with a `type` tag so they
/// can be forwarded as JSON lines unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExplorationEvent {
    /// A run began (fresh session or resumed from a checkpoint)
    SessionStarted {
        session_id: Uuid,
        /// True when the session was reloaded from a checkpoint
        resumed: bool,
        /// Articles handed to this run, including ones that will be skipped on resume
        articles_total: usize,
        /// Live codes at run start
        codes_in_codebook: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Decisions for an article are about to be made
    ArticleStarted {
        session_id: Uuid,
        article_id: u64,
        title: String,
        /// Accepted candidates produced by generation
        candidates: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The decision engine chose an operation for a candidate
    CandidateDecided {
        session_id: Uuid,
        article_id: u64,
        candidate_index: usize,
        candidate_name: String,
        /// CREATE_CODE, MERGE_CODES, UPDATE_CODE or NO_ACTION
        operation: String,
        confidence: f32,
        /// Decided through the AI-assisted tie-break
        assisted: bool,
        /// Routed to the review hook
        requires_review: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An operation was applied to the codebook
    OperationApplied {
        session_id: Uuid,
        article_id: u64,
        candidate_index: usize,
        operation: String,
        /// Code created or modified (None for NO_ACTION)
        code_id: Option<u64>,
        /// Code version after the apply
        version: Option<u32>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A candidate was rejected or could not be applied
    CandidateSkipped {
        session_id: Uuid,
        article_id: u64,
        candidate_index: usize,
        candidate_name: String,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// An article produced no decisions (generation failure)
    ArticleSkipped {
        session_id: Uuid,
        article_id: u64,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// All candidates of an article were handled
    ArticleCompleted {
        session_id: Uuid,
        article_id: u64,
        applied: usize,
        skipped: usize,
        /// Live codes after the article
        codes_in_codebook: usize,
        articles_processed: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Codebook and session were persisted
    CheckpointSaved {
        session_id: Uuid,
        articles_processed: u64,
        path: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The run stopped
    SessionFinished {
        session_id: Uuid,
        articles_processed: u64,
        codes_in_codebook: usize,
        /// True when stopped by cancellation before the article list was exhausted
        cancelled: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl ExplorationEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            ExplorationEvent::SessionStarted { .. } => "SessionStarted",
            ExplorationEvent::ArticleStarted { .. } => "ArticleStarted",
            ExplorationEvent::CandidateDecided { .. } => "CandidateDecided",
            ExplorationEvent::OperationApplied { .. } => "OperationApplied",
            ExplorationEvent::CandidateSkipped { .. } => "CandidateSkipped",
            ExplorationEvent::ArticleSkipped { .. } => "ArticleSkipped",
            ExplorationEvent::ArticleCompleted { .. } => "ArticleCompleted",
            ExplorationEvent::CheckpointSaved { .. } => "CheckpointSaved",
            ExplorationEvent::SessionFinished { .. } => "SessionFinished",
        }
    }

    /// Session the event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            ExplorationEvent::SessionStarted { session_id, .. }
            | ExplorationEvent::ArticleStarted { session_id, .. }
            | ExplorationEvent::CandidateDecided { session_id, .. }
            | ExplorationEvent::OperationApplied { session_id, .. }
            | ExplorationEvent::CandidateSkipped { session_id, .. }
            | ExplorationEvent::ArticleSkipped { session_id, .. }
            | ExplorationEvent::ArticleCompleted { session_id, .. }
            | ExplorationEvent::CheckpointSaved { session_id, .. }
            | ExplorationEvent::SessionFinished { session_id, .. } => *session_id,
        }
    }
}

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`:
/// - Non-blocking publish (slow subscribers don't block the engine)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use qcb_common::events::{EventBus, ExplorationEvent};
/// use uuid::Uuid;
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(ExplorationEvent::ArticleSkipped {
///     session_id: Uuid::new_v4(),
///     article_id: 7,
///     reason: "generation failed".to_string(),
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert_eq!(rx.try_recv().unwrap().event_type(), "ArticleSkipped");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ExplorationEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ExplorationEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ExplorationEvent,
    ) -> Result<usize, broadcast::error::SendError<ExplorationEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ExplorationEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
