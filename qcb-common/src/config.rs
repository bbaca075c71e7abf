//! Configuration loading and config path resolution
//!
//! Bootstrap configuration lives in a single TOML file. Every field has a
//! built-in default, so a partial (or empty) file is valid.
//!
//! # Config Path Priority
//!
//! 1. Command-line argument (`--config`)
//! 2. Environment variable (`QCB_CONFIG`)
//! 3. Platform config directory (`<config_dir>/qcb/config.toml`), if present

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "QCB_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Optional research framework TOML (built-in framework when absent)
    pub framework_path: Option<PathBuf>,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Similarity, decision and checkpoint tuning
    pub exploration: ExplorationConfig,

    /// Text generation capability
    pub generation: GenerationConfig,

    /// Embedding capability
    pub embedding: EmbeddingConfig,

    /// AI-assisted tie-break on function conflicts
    pub tie_break: TieBreakConfig,

    /// Remote API endpoint settings
    pub api: ApiConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Similarity retrieval, decision thresholds and session checkpointing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationConfig {
    /// Maximum number of similar codes retrieved per candidate
    pub similarity_k: usize,

    /// Minimum cosine similarity for a code to count as similar
    pub similarity_threshold: f32,

    /// Similarity at or above which a candidate merges into its top match
    pub merge_threshold: f32,

    /// Decisions with lower confidence are routed to human review
    pub confidence_floor: f32,

    /// Articles whose generation/embedding may run ahead of the apply stage
    pub prefetch_articles: usize,

    /// Persist a checkpoint after this many processed articles
    pub checkpoint_every_articles: u64,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            similarity_k: 5,
            similarity_threshold: 0.8,
            merge_threshold: 0.95,
            confidence_floor: 0.6,
            prefetch_articles: 2,
            checkpoint_every_articles: 1,
        }
    }
}

/// Bounded retry settings for one external capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

/// Text generation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_attempts: u32,
    pub timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: None,
            max_attempts: 3,
            timeout_ms: 60_000,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl GenerationConfig {
    pub fn retry(&self) -> RetrySettings {
        retry_settings(
            self.max_attempts,
            self.timeout_ms,
            self.initial_backoff_ms,
            self.max_backoff_ms,
        )
    }
}

/// Embedding settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    /// Length of every embedding vector
    pub dimension: usize,
    pub max_attempts: u32,
    pub timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            max_attempts: 3,
            timeout_ms: 30_000,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl EmbeddingConfig {
    pub fn retry(&self) -> RetrySettings {
        retry_settings(
            self.max_attempts,
            self.timeout_ms,
            self.initial_backoff_ms,
            self.max_backoff_ms,
        )
    }
}

/// AI-assisted tie-break settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TieBreakConfig {
    /// When false, function conflicts always resolve to NO_ACTION
    pub enabled: bool,
    pub max_attempts: u32,
    pub timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for TieBreakConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 2,
            timeout_ms: 30_000,
            initial_backoff_ms: 500,
            max_backoff_ms: 4_000,
        }
    }
}

impl TieBreakConfig {
    pub fn retry(&self) -> RetrySettings {
        retry_settings(
            self.max_attempts,
            self.timeout_ms,
            self.initial_backoff_ms,
            self.max_backoff_ms,
        )
    }
}

/// Remote API settings (OpenAI-compatible endpoint)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// API key (environment variables take priority)
    pub api_key: Option<String>,
    /// Client-side rate limit shared by all capabilities
    pub requests_per_second: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            requests_per_second: 5,
        }
    }
}

fn retry_settings(
    max_attempts: u32,
    timeout_ms: u64,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
) -> RetrySettings {
    RetrySettings {
        max_attempts,
        timeout: Duration::from_millis(timeout_ms),
        initial_backoff: Duration::from_millis(initial_backoff_ms),
        max_backoff: Duration::from_millis(max_backoff_ms),
    }
}

impl TomlConfig {
    /// Load configuration from a TOML file
    ///
    /// Fails if the file is missing or malformed; callers that want graceful
    /// degradation fall back to `TomlConfig::default()` and log the error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        let ex = &self.exploration;

        if ex.similarity_k == 0 {
            return Err(Error::Config("exploration.similarity_k must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&ex.similarity_threshold) {
            return Err(Error::Config(format!(
                "exploration.similarity_threshold must be within [0, 1], got {}",
                ex.similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&ex.merge_threshold) {
            return Err(Error::Config(format!(
                "exploration.merge_threshold must be within [0, 1], got {}",
                ex.merge_threshold
            )));
        }
        if ex.merge_threshold < ex.similarity_threshold {
            return Err(Error::Config(format!(
                "exploration.merge_threshold ({}) must not be below similarity_threshold ({})",
                ex.merge_threshold, ex.similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&ex.confidence_floor) {
            return Err(Error::Config(format!(
                "exploration.confidence_floor must be within [0, 1], got {}",
                ex.confidence_floor
            )));
        }
        if ex.checkpoint_every_articles == 0 {
            return Err(Error::Config(
                "exploration.checkpoint_every_articles must be at least 1".to_string(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(Error::Config("embedding.dimension must be at least 1".to_string()));
        }
        for (section, attempts) in [
            ("generation", self.generation.max_attempts),
            ("embedding", self.embedding.max_attempts),
            ("tie_break", self.tie_break.max_attempts),
        ] {
            if attempts == 0 {
                return Err(Error::Config(format!(
                    "{}.max_attempts must be at least 1",
                    section
                )));
            }
        }
        if self.api.requests_per_second == 0 {
            return Err(Error::Config("api.requests_per_second must be at least 1".to_string()));
        }

        Ok(())
    }
}

/// Resolve the config file path
///
/// Returns `None` when no explicit path was given and no default file exists.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    let path = default_config_path().filter(|path| path.exists());
    if path.is_none() {
        debug!("No config file in the platform config directory");
    }
    path
}

/// Default config file location for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("qcb").join("config.toml"))
}

/// Write configuration to a TOML file atomically
///
/// Writes to a sibling temp file and renames it over the target so readers
/// never observe a half-written file.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    write_atomic(path, content.as_bytes())
}

/// Write bytes to `path` via temp file + rename
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::InvalidInput(format!("Not a file path: {}", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, bytes)?;
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        if let Err(cleanup) = std::fs::remove_file(&tmp_path) {
            warn!(path = %tmp_path.display(), error = %cleanup, "Failed to remove temp file");
        }
        return Err(e.into());
    }
    debug!(path = %path.display(), bytes = bytes.len(), "Wrote file atomically");
    Ok(())
}

/// User-Agent string for outbound HTTP clients
pub fn get_user_agent() -> String {
    format!("qcb/{}", env!("CARGO_PKG_VERSION"))
}
