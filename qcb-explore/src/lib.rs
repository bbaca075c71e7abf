//! qcb-explore library interface
//!
//! Incremental codebook construction: candidates generated from articles are
//! compared against the evolving codebook and folded in through one of
//! CREATE_CODE, MERGE_CODES, UPDATE_CODE or NO_ACTION.

pub mod articles;
pub mod candidate_generator;
pub mod clients;
pub mod codebook;
pub mod config;
pub mod decision;
pub mod embedding_store;
pub mod error;
pub mod framework;
pub mod orchestrator;
pub mod response;
pub mod retry;
pub mod review;
pub mod session;
pub mod similarity;
pub mod snapshot;
pub mod tie_break;
pub mod types;

pub use crate::codebook::Codebook;
pub use crate::error::{CodebookError, CodebookResult};
pub use crate::orchestrator::{ExplorationOrchestrator, OrchestratorSettings, RunSummary};
pub use crate::session::ProcessingSession;
