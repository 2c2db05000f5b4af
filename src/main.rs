//! # ragmill CLI (`rml`)
//!
//! The `rml` binary is the operational surface for ragmill. It provides
//! commands for ingesting documents, asking questions against the corpus,
//! raw retrieval, index management, token-usage reporting, and runtime
//! configuration.
//!
//! ## Usage
//!
//! ```bash
//! rml --config ./ragmill.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rml ingest <path>` | Ingest a file or directory into the index |
//! | `rml ask "<question>"` | Answer a question with retrieved context |
//! | `rml search "<query>"` | Raw retrieval without generation |
//! | `rml delete <document-id>` | Remove a document's chunks from the index |
//! | `rml clear` | Drop the entire index |
//! | `rml stats` | Index, vectorizer, and model statistics |
//! | `rml usage` | Daily token usage against the quota |
//! | `rml config show\|set` | Inspect or update runtime configuration |
//! | `rml health` | Probe the generation API |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ragmill::config::{self, Config, RagConfigUpdate};
use ragmill::generation::HttpGenerationClient;
use ragmill::index::VectorIndex;
use ragmill::ledger::TokenUsageLedger;
use ragmill::models::DocumentStatus;
use ragmill::retrieval::RetrievalEngine;
use ragmill::service::{AskOptions, RagService};
use ragmill::vectorizer::TermWeightVectorizer;

/// ragmill — ingest documents, retrieve grounded context, generate answers.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; a missing file falls back to built-in defaults.
#[derive(Parser)]
#[command(
    name = "rml",
    about = "ragmill — a single-process retrieval-augmented generation core",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./ragmill.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Ingest a file or directory into the index.
    ///
    /// Extracts text per format (pdf, docx, xlsx, csv, txt, md), splits it
    /// into sentence-aligned chunks, and indexes them. Re-ingesting an
    /// unchanged file is skipped; a changed file replaces its old chunks.
    Ingest {
        /// File or directory to ingest.
        path: PathBuf,
    },

    /// Answer a question using retrieved context.
    ///
    /// Retrieves the most similar chunks, filters them by the similarity
    /// threshold, and prompts the generation backend with the survivors.
    /// Requires the generation API key environment variable.
    Ask {
        /// The question to answer.
        question: String,

        /// Number of context chunks to retrieve.
        #[arg(long)]
        top_k: Option<usize>,

        /// Generation temperature (0.0–2.0).
        #[arg(long)]
        temperature: Option<f64>,

        /// Maximum response tokens (100–4000).
        #[arg(long)]
        max_tokens: Option<u32>,
    },

    /// Raw retrieval: ranked chunks with similarity scores, no generation.
    Search {
        /// The search query.
        query: String,

        /// Number of results to return.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Delete all chunks belonging to a document.
    Delete {
        /// Document id (shown by `ingest` and `search`).
        document_id: String,
    },

    /// Drop the entire index, retained content, and fit state.
    Clear,

    /// Show index, vectorizer, and model statistics.
    Stats,

    /// Show daily token usage against the quota.
    Usage {
        /// Also print per-day usage history.
        #[arg(long)]
        history: bool,

        /// Reset usage and history (administrative).
        #[arg(long)]
        reset: bool,
    },

    /// Inspect or update runtime configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Probe the generation API with a minimal call.
    Health,
}

/// Configuration subcommands.
#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current configuration as JSON.
    Show,

    /// Update runtime fields, given as `key=value` pairs.
    ///
    /// Valid keys: top_k, temperature, max_tokens, chunk_size,
    /// chunk_overlap, similarity_threshold. Out-of-range values are
    /// rejected per field; the remaining valid fields still apply.
    Set {
        /// Updates as `key=value` pairs, e.g. `top_k=8 temperature=0.4`.
        #[arg(required = true)]
        updates: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ragmill=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        tracing::debug!(path = %cli.config.display(), "config file not found; using defaults");
        Config::default()
    };

    let service = build_service(&config)?;

    match cli.command {
        Commands::Ingest { path } => run_ingest(&service, &path)?,
        Commands::Ask {
            question,
            top_k,
            temperature,
            max_tokens,
        } => {
            let outcome = service
                .ask(
                    &question,
                    AskOptions {
                        top_k,
                        temperature,
                        max_tokens,
                        history: None,
                    },
                )
                .await?;

            println!("{}", outcome.answer);
            if !outcome.sources.is_empty() {
                println!();
                println!("sources:");
                for (i, source) in outcome.sources.iter().enumerate() {
                    println!(
                        "  [{}] {} #{} (similarity: {:.2})",
                        i + 1,
                        source.document_name,
                        source.chunk_index,
                        source.similarity
                    );
                }
            }
            println!();
            println!(
                "model: {}  retrieval: {:.2}s  generation: {:.2}s  tokens: {}",
                outcome.model,
                outcome.retrieval_secs,
                outcome.generation_secs,
                outcome
                    .tokens_used
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
        Commands::Search { query, top_k } => {
            let k = top_k.unwrap_or_else(|| service.config().rag.top_k);
            let results = service.search(&query, k)?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, result) in results.iter().enumerate() {
                println!(
                    "{}. [{:.2}] {} #{}",
                    i + 1,
                    result.similarity,
                    result.document_name,
                    result.chunk_index
                );
                let excerpt: String = result.content.chars().take(160).collect();
                println!("    excerpt: \"{}\"", excerpt.replace('\n', " "));
                println!("    document: {}", result.document_id);
                println!();
            }
        }
        Commands::Delete { document_id } => {
            let removed = service.delete_document(&document_id);
            println!("delete {}", document_id);
            println!("  chunks removed: {}", removed);
            println!("ok");
        }
        Commands::Clear => {
            service.clear();
            println!("index cleared");
        }
        Commands::Stats => {
            let stats = service.stats();
            println!("stats");
            println!("  vectors: {}", stats.index.total_vectors);
            println!("  dimension: {}", stats.index.dimension);
            println!("  documents: {}", stats.index.document_count);
            println!("  vocabulary: {}", stats.vectorizer.vocabulary_size);
            println!("  model: {}", stats.model);
        }
        Commands::Usage { history, reset } => {
            if reset {
                service.reset_usage()?;
                println!("token usage reset");
            } else {
                let usage = service.usage()?;
                println!("token usage for {}", usage.last_reset_date);
                println!("  used: {}", usage.current_usage);
                println!("  quota: {}", usage.daily_quota);
                println!("  remaining: {}", usage.remaining);
                println!("  percentage: {:.1}%", usage.usage_percentage);
                if history {
                    let past = service.usage_history();
                    if !past.is_empty() {
                        println!("  history:");
                        for (date, used) in past {
                            println!("    {}: {}", date, used);
                        }
                    }
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&service.config())?);
            }
            ConfigAction::Set { updates } => {
                let (update, parse_errors) = parse_updates(&updates);
                let report = service.update_config(&update);

                for field in &report.applied {
                    println!("applied: {}", field);
                }
                for rejection in &report.rejected {
                    println!("rejected: {} ({})", rejection.field, rejection.reason);
                }
                for err in &parse_errors {
                    println!("rejected: {}", err);
                }
            }
        },
        Commands::Health => {
            if service.check_health().await {
                println!("generation API: healthy");
            } else {
                println!("generation API: unreachable");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn build_service(config: &Config) -> Result<RagService> {
    let vectorizer = TermWeightVectorizer::new(
        config.vectorizer.max_features,
        config.vectorizer.min_df,
        config.vectorizer.max_df,
    );
    let index = VectorIndex::open(config.storage.index_dir())?;
    let engine = RetrievalEngine::new(vectorizer, index, config.vectorizer.dense_dim);
    let ledger = TokenUsageLedger::open(
        config.storage.ledger_path(),
        config.generation.daily_token_quota,
    )?;
    let client = Arc::new(HttpGenerationClient::new(&config.generation)?);
    Ok(RagService::new(config, engine, ledger, client))
}

fn run_ingest(service: &RagService, path: &std::path::Path) -> Result<()> {
    if path.is_dir() {
        let (report, outcomes) = service.ingest_dir(path)?;
        println!("ingest {}", path.display());
        println!("  files seen: {}", report.files_seen);
        println!("  ingested: {}", report.ingested);
        println!("  skipped unchanged: {}", report.skipped);
        println!("  failed: {}", report.failed);
        println!("  chunks written: {}", report.chunks_written);
        for outcome in outcomes.iter().filter(|o| o.document.error.is_some()) {
            println!(
                "  failed: {} ({})",
                outcome.document.filename,
                outcome.document.error.as_deref().unwrap_or("unknown")
            );
        }
        println!("ok");
    } else {
        let outcome = service.ingest_file(path)?;
        println!("ingest {}", path.display());
        match outcome.document.status {
            DocumentStatus::Completed if outcome.skipped_unchanged => {
                println!("  unchanged; skipped");
            }
            DocumentStatus::Completed => {
                println!("  chunks: {}", outcome.chunks_indexed);
                println!("  chars: {}", outcome.document.text_length);
                println!("  document: {}", outcome.document.id);
                if outcome.replaced {
                    println!("  replaced previous version");
                }
            }
            _ => {
                println!(
                    "  failed: {}",
                    outcome.document.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        println!("ok");
    }
    Ok(())
}

/// Parse `key=value` pairs into a config update, collecting per-field parse
/// failures without aborting the rest.
fn parse_updates(pairs: &[String]) -> (RagConfigUpdate, Vec<String>) {
    let mut update = RagConfigUpdate::default();
    let mut errors = Vec::new();

    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            errors.push(format!("{} (expected key=value)", pair));
            continue;
        };

        match key {
            "top_k" => update.top_k = parse_int(key, value, &mut errors),
            "max_tokens" => update.max_tokens = parse_int(key, value, &mut errors),
            "chunk_size" => update.chunk_size = parse_int(key, value, &mut errors),
            "chunk_overlap" => update.chunk_overlap = parse_int(key, value, &mut errors),
            "temperature" => match value.parse::<f64>() {
                Ok(v) => update.temperature = Some(v),
                Err(_) => errors.push(format!("temperature (not a number: {})", value)),
            },
            "similarity_threshold" => match value.parse::<f64>() {
                Ok(v) => update.similarity_threshold = Some(v),
                Err(_) => errors.push(format!("similarity_threshold (not a number: {})", value)),
            },
            other => errors.push(format!("{} (unknown field)", other)),
        }
    }

    (update, errors)
}

fn parse_int(key: &str, value: &str, errors: &mut Vec<String>) -> Option<i64> {
    match value.parse::<i64>() {
        Ok(v) => Some(v),
        Err(_) => {
            errors.push(format!("{} (not an integer: {})", key, value));
            None
        }
    }
}
