//! # QCB Common Library
//!
//! Shared code for the qualitative codebook tools:
//! - Error type shared across crates
//! - TOML bootstrap configuration and path resolution
//! - Exploration event types and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
