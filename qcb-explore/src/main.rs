//! qcb-explore - Qualitative codebook explorer
//!
//! Reads an article corpus, proposes candidate codes for each article and
//! folds them into a persistent codebook snapshot. Interrupted runs resume
//! from the snapshot's session marker.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use qcb_common::config::{resolve_config_path, write_atomic, TomlConfig};
use qcb_common::events::ExplorationEvent;
use qcb_explore::candidate_generator::CandidateGenerator;
use qcb_explore::clients::OpenAiClient;
use qcb_explore::clients::openai::OpenAiSettings;
use qcb_explore::decision::{DecisionConfig, DecisionEngine};
use qcb_explore::framework::ResearchFramework;
use qcb_explore::retry::RetryPolicy;
use qcb_explore::review::ReviewPolicy;
use qcb_explore::tie_break::AssistedTieBreaker;
use qcb_explore::{snapshot, Codebook, ExplorationOrchestrator, OrchestratorSettings, ProcessingSession};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for qcb-explore
#[derive(Parser, Debug)]
#[command(name = "qcb-explore")]
#[command(about = "Incremental qualitative codebook construction")]
#[command(version)]
struct Args {
    /// Config file (overrides QCB_CONFIG and the platform default)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Research framework TOML (overrides framework_path in the config)
    #[arg(short, long, global = true)]
    framework: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process articles into the codebook
    Explore {
        /// JSON array of {id, title, content}
        #[arg(long)]
        articles: PathBuf,

        /// Codebook snapshot (created if missing, checkpointed during the run)
        #[arg(long)]
        codebook: PathBuf,

        /// Process at most N pending articles
        #[arg(long)]
        limit: Option<usize>,

        /// Review policy for low-confidence decisions (auto, conservative)
        #[arg(long, default_value = "auto")]
        review: ReviewPolicy,

        /// Ignore an existing snapshot and start a new codebook
        #[arg(long)]
        fresh: bool,
    },

    /// Print codebook statistics as JSON
    Stats {
        #[arg(long)]
        codebook: PathBuf,
    },

    /// Write the human-readable codebook export
    Export {
        #[arg(long)]
        codebook: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is loaded before tracing so the log level can come from it;
    // problems are reported once the subscriber is up
    let mut startup_warnings = Vec::new();
    let config = load_config(args.config.as_deref(), &mut startup_warnings)?;
    init_tracing(&config)?;
    for warning in &startup_warnings {
        warn!("{}", warning);
    }

    info!(
        "Starting qcb-explore v{} ({} built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("QCB_GIT_HASH"),
        env!("QCB_BUILD_TIMESTAMP"),
        env!("QCB_BUILD_PROFILE")
    );

    let framework_path = args.framework.clone().or_else(|| config.framework_path.clone());
    let framework = load_framework(framework_path.as_deref())?;

    match args.command {
        Command::Explore {
            articles,
            codebook,
            limit,
            review,
            fresh,
        } => explore(&config, framework, &articles, &codebook, limit, review, fresh).await,
        Command::Stats { codebook } => {
            let (codebook, _) = snapshot::load_snapshot(&codebook, &framework.function_set())
                .with_context(|| format!("Failed to load codebook {}", codebook.display()))?;
            println!("{}", serde_json::to_string_pretty(&codebook.statistics())?);
            Ok(())
        }
        Command::Export { codebook, output } => {
            let (codebook, _) = snapshot::load_snapshot(&codebook, &framework.function_set())
                .with_context(|| format!("Failed to load codebook {}", codebook.display()))?;
            let json = serde_json::to_string_pretty(&codebook.export())?;
            match output {
                Some(path) => {
                    write_atomic(&path, json.as_bytes())
                        .with_context(|| format!("Failed to write export {}", path.display()))?;
                    info!(path = %path.display(), codes = codebook.len(), "Wrote codebook export");
                }
                None => println!("{}", json),
            }
            Ok(())
        }
    }
}

async fn explore(
    config: &TomlConfig,
    framework: ResearchFramework,
    articles_path: &Path,
    codebook_path: &Path,
    limit: Option<usize>,
    review: ReviewPolicy,
    fresh: bool,
) -> Result<()> {
    let functions = framework.function_set();
    let articles = qcb_explore::articles::load_articles(articles_path)
        .with_context(|| format!("Failed to load articles {}", articles_path.display()))?;

    let (mut codebook, mut session) = if codebook_path.exists() && !fresh {
        snapshot::load_snapshot(codebook_path, &functions)
            .with_context(|| format!("Failed to load codebook {}", codebook_path.display()))?
    } else {
        if fresh && codebook_path.exists() {
            warn!(path = %codebook_path.display(), "Starting a fresh codebook; the existing snapshot will be overwritten");
        }
        (
            Codebook::new(config.embedding.dimension, functions),
            ProcessingSession::new(),
        )
    };

    let dimension = codebook.embedding_store().dimension();
    if dimension != config.embedding.dimension {
        bail!(
            "Codebook {} uses {}-dimensional embeddings but embedding.dimension is {}",
            codebook_path.display(),
            dimension,
            config.embedding.dimension
        );
    }

    let api_key = qcb_explore::config::resolve_api_key(config)?;
    let client = Arc::new(
        OpenAiClient::new(OpenAiSettings::from_config(config, api_key))
            .context("Failed to initialize model API client")?,
    );

    let framework = Arc::new(framework);
    let generator = Arc::new(CandidateGenerator::new(
        client.clone(),
        client.clone(),
        Arc::clone(&framework),
        RetryPolicy::from_settings(config.generation.retry()),
        RetryPolicy::from_settings(config.embedding.retry()),
        dimension,
    ));

    let mut decisions = DecisionEngine::new(DecisionConfig::from_exploration(&config.exploration));
    if config.tie_break.enabled {
        decisions = decisions.with_tie_breaker(Arc::new(AssistedTieBreaker::new(
            client.clone(),
            Arc::clone(&framework),
            RetryPolicy::from_settings(config.tie_break.retry()),
        )));
    } else {
        info!("Assisted tie-break disabled; function conflicts resolve to NO_ACTION");
    }

    let mut settings =
        OrchestratorSettings::from_config(&config.exploration, Some(codebook_path.to_path_buf()));
    settings.max_articles = limit;

    let orchestrator =
        ExplorationOrchestrator::new(generator, decisions, settings).with_review_hook(review.hook());

    let progress = tokio::spawn(log_progress(orchestrator.event_bus().subscribe()));

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let summary = orchestrator
        .run(&mut codebook, &mut session, articles, cancel)
        .await
        .context("Exploration failed")?;

    // Closing the bus ends the progress task
    drop(orchestrator);
    if let Err(e) = progress.await {
        warn!(error = %e, "Progress task ended abnormally");
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn load_config(cli_path: Option<&Path>, warnings: &mut Vec<String>) -> Result<TomlConfig> {
    let config = match resolve_config_path(cli_path) {
        Some(path) => match TomlConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warnings.push(format!(
                    "Config {} unusable ({}); using built-in defaults",
                    path.display(),
                    e
                ));
                TomlConfig::default()
            }
        },
        None => {
            warnings.push("No config file found; using built-in defaults".to_string());
            TomlConfig::default()
        }
    };

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn load_framework(path: Option<&Path>) -> Result<ResearchFramework> {
    match path {
        Some(path) => {
            let framework = ResearchFramework::from_toml_file(path)
                .with_context(|| format!("Failed to load research framework {}", path.display()))?;
            info!(name = %framework.name, functions = framework.functions.len(), "Loaded research framework");
            Ok(framework)
        }
        None => Ok(ResearchFramework::entman()),
    }
}

fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("qcb_explore={0},qcb_common={0}", config.logging.level).into());

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

/// One progress line per completed article
async fn log_progress(mut rx: tokio::sync::broadcast::Receiver<ExplorationEvent>) {
    loop {
        match rx.recv().await {
            Ok(ExplorationEvent::ArticleCompleted {
                article_id,
                applied,
                skipped,
                codes_in_codebook,
                articles_processed,
                ..
            }) => {
                info!(
                    "Article {} done: {} applied, {} skipped, {} codes ({} articles processed)",
                    article_id, applied, skipped, codes_in_codebook, articles_processed
                );
            }
            Ok(ExplorationEvent::CheckpointSaved { path, .. }) => {
                tracing::debug!(path = %path, "Checkpoint saved");
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "Progress listener lagged behind the event bus");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Cancel at the next article boundary on Ctrl+C
async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, stopping after the current article");
            cancel.cancel();
        }
        Err(e) => warn!(error = %e, "Failed to install Ctrl+C handler"),
    }
}
