//! Configuration resolution for qcb-explore
//!
//! Provides API key resolution with ENV → TOML priority.

use qcb_common::config::TomlConfig;
use qcb_common::{Error, Result};
use tracing::{info, warn};

/// Primary environment variable for the model API key
pub const API_KEY_ENV_VAR: &str = "QCB_API_KEY";

/// Fallback environment variable shared with other OpenAI tooling
pub const OPENAI_API_KEY_ENV_VAR: &str = "OPENAI_API_KEY";

/// Resolve the model API key from 3-tier configuration
///
/// **Priority:** `QCB_API_KEY` → `OPENAI_API_KEY` → TOML `[api] api_key`
pub fn resolve_api_key(toml_config: &TomlConfig) -> Result<String> {
    let tiers = [
        ("QCB_API_KEY", std::env::var(API_KEY_ENV_VAR).ok()),
        ("OPENAI_API_KEY", std::env::var(OPENAI_API_KEY_ENV_VAR).ok()),
        ("TOML", toml_config.api.api_key.clone()),
    ];

    let sources: Vec<&str> = tiers
        .iter()
        .filter(|(_, key)| key.as_deref().map_or(false, is_valid_key))
        .map(|(source, _)| *source)
        .collect();

    // Warn if multiple sources (potential misconfiguration)
    if sources.len() > 1 {
        warn!(
            "API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    for (source, key) in tiers {
        if let Some(key) = key {
            if is_valid_key(&key) {
                info!("API key loaded from {}", source);
                return Ok(key.trim().to_string());
            }
        }
    }

    // No valid key found
    Err(Error::Config(
        "Model API key not configured. Please configure using one of:\n\
         1. Environment: QCB_API_KEY=your-key\n\
         2. Environment: OPENAI_API_KEY=your-key\n\
         3. TOML config: [api] api_key = \"your-key\""
            .to_string(),
    ))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
