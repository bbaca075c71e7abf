//! Test Helper Utilities
//!
//! Shared utilities for testing qcb-explore

#![allow(dead_code)]

pub mod fake_clients;
pub mod pipeline;

// Re-export commonly used items
pub use fake_clients::{codes_json, unit_vector, FakeEmbedding, FakeGeneration};
pub use pipeline::{build_orchestrator, candidate, entman_functions, test_policy, PipelineOptions};
