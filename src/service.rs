//! The RAG orchestrator: retrieval + generation + accounting.
//!
//! [`RagService`] ties the retrieval engine to a generation client. It is
//! explicitly constructed from its parts (engine, ledger, client) — there
//! are no process-wide singletons, so tests build fresh instances freely.
//!
//! # Locking
//!
//! The engine (vectorizer + index + retained texts) sits behind one
//! `RwLock`: searches take the read lock, mutations (ingest, delete, clear,
//! refit) the write lock, which fences vocabulary swaps and index rebuilds
//! from in-flight searches. Guards are never held across `.await` — `ask`
//! finishes retrieval and releases the lock before the generation call, so
//! a slow backend never blocks unrelated requests.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{Config, IngestConfig, RagConfig, RagConfigUpdate, UpdateReport};
use crate::generation::{build_rag_prompt, GenerationClient, PromptChunk, SYSTEM_PROMPT};
use crate::ingest::{self, IngestOutcome, IngestReport};
use crate::ledger::{TokenUsageLedger, UsageReport};
use crate::models::{AskOutcome, ChatTurn, IndexStats, SearchResult, SourceRef};
use crate::retrieval::RetrievalEngine;
use crate::vectorizer::VectorizerInfo;

/// Fixed answer returned when no retrieved chunk clears the similarity
/// threshold; no generation call is made in that case.
pub const NO_CONTEXT_ANSWER: &str = "I could not find information related to your question in \
the current knowledge base. You could try:\n\
1. Checking that the question is clear and specific\n\
2. Adding more relevant documents to the knowledge base\n\
3. Rephrasing the question";

/// Max chars of chunk content returned in a source preview.
const SOURCE_PREVIEW_CHARS: usize = 200;

/// Optional per-request overrides for [`RagService::ask`].
#[derive(Debug, Default, Clone)]
pub struct AskOptions {
    pub top_k: Option<usize>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub history: Option<Vec<ChatTurn>>,
}

/// Current configuration, grouped the way callers consume it.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigReport {
    pub rag: RagConfig,
    pub vectorizer: VectorizerInfo,
    pub supported_formats: Vec<String>,
}

/// Point-in-time system statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub index: IndexStats,
    pub vectorizer: VectorizerInfo,
    pub model: String,
    pub config: RagConfig,
    pub timestamp: DateTime<Utc>,
}

pub struct RagService {
    rag: RwLock<RagConfig>,
    ingest_cfg: IngestConfig,
    engine: RwLock<RetrievalEngine>,
    ledger: TokenUsageLedger,
    client: Arc<dyn GenerationClient>,
}

impl RagService {
    /// Assemble the service from explicitly constructed parts.
    pub fn new(
        config: &Config,
        engine: RetrievalEngine,
        ledger: TokenUsageLedger,
        client: Arc<dyn GenerationClient>,
    ) -> Self {
        Self {
            rag: RwLock::new(config.rag_config()),
            ingest_cfg: config.ingest.clone(),
            engine: RwLock::new(engine),
            ledger,
            client,
        }
    }

    // ============ Ask ============

    /// Answer a question with retrieved context.
    ///
    /// Retrieves the top-k chunks on the precise path, drops results below
    /// the similarity threshold, short-circuits with [`NO_CONTEXT_ANSWER`]
    /// when none remain, otherwise prompts the generation client and
    /// records returned token usage in the ledger (advisory — a quota
    /// refusal is logged, never blocks the call).
    pub async fn ask(&self, question: &str, opts: AskOptions) -> Result<AskOutcome> {
        let start = Instant::now();
        let rag = self.rag.read().unwrap().clone();

        let top_k = opts.top_k.unwrap_or(rag.top_k);
        let temperature = opts.temperature.unwrap_or(rag.temperature);
        let max_tokens = opts.max_tokens.unwrap_or(rag.max_tokens);

        tracing::info!(question = %truncate(question, 100), top_k, "processing question");

        let retrieval_start = Instant::now();
        let results = self.retrieve(question, top_k)?;
        let retrieval_secs = retrieval_start.elapsed().as_secs_f64();
        tracing::info!(
            retrieved = results.len(),
            secs = retrieval_secs,
            "retrieval complete"
        );

        let relevant: Vec<SearchResult> = results
            .into_iter()
            .filter(|r| f64::from(r.similarity) >= rag.similarity_threshold)
            .collect();

        if relevant.is_empty() {
            tracing::info!("no chunk cleared the similarity threshold; skipping generation");
            return Ok(AskOutcome {
                question: question.to_string(),
                answer: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                model: rag.model.clone(),
                retrieval_secs,
                generation_secs: 0.0,
                total_secs: start.elapsed().as_secs_f64(),
                tokens_used: None,
            });
        }

        let context_chunks: Vec<PromptChunk> = relevant
            .iter()
            .map(|r| PromptChunk {
                content: r.content.clone(),
                source: format!("{} (similarity: {:.2})", r.document_name, r.similarity),
            })
            .collect();
        let prompt = build_rag_prompt(question, &context_chunks, opts.history.as_deref());

        let generation_start = Instant::now();
        let generation = self
            .client
            .generate(SYSTEM_PROMPT, &prompt, temperature, max_tokens, false)
            .await?;
        let generation_secs = generation_start.elapsed().as_secs_f64();

        if let Some(tokens) = generation.total_tokens {
            match self.ledger.add(tokens) {
                Ok(true) => {}
                Ok(false) => {
                    // Advisory only: recorded and logged, never enforced here.
                    tracing::warn!(tokens, "daily token quota exceeded; usage not recorded");
                }
                Err(e) => tracing::warn!(error = %e, "could not record token usage"),
            }
        }

        let sources: Vec<SourceRef> = relevant
            .iter()
            .map(|r| SourceRef {
                entry_id: r.entry_id,
                document_id: r.document_id.clone(),
                document_name: r.document_name.clone(),
                chunk_index: r.chunk_index,
                similarity: r.similarity,
                content: preview(&r.content),
            })
            .collect();

        tracing::info!(
            sources = sources.len(),
            tokens = ?generation.total_tokens,
            secs = generation_secs,
            "generation complete"
        );

        Ok(AskOutcome {
            question: question.to_string(),
            answer: generation.content,
            sources,
            model: generation.model,
            retrieval_secs,
            generation_secs,
            total_secs: start.elapsed().as_secs_f64(),
            tokens_used: generation.total_tokens,
        })
    }

    /// Precise search under the read lock; falls back to the write lock
    /// only when a degraded lazy fit is needed.
    fn retrieve(&self, question: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        {
            let engine = self.engine.read().unwrap();
            if engine.is_empty() {
                return Ok(Vec::new());
            }
            if engine.is_fitted() {
                return engine.search_precise(question, top_k);
            }
        }
        let mut engine = self.engine.write().unwrap();
        engine.search_precise_lazy(question, top_k)
    }

    /// Raw precise search, bypassing threshold filtering and generation.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        self.retrieve(query, top_k)
    }

    /// Dense search for callers holding an opaque embedding.
    pub fn search_dense(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        self.engine.read().unwrap().search_dense(query, top_k)
    }

    // ============ Ingestion & index management ============

    pub fn ingest_file(&self, path: &Path) -> Result<IngestOutcome> {
        let (chunk_size, chunk_overlap) = self.chunking();
        let mut engine = self.engine.write().unwrap();
        ingest::ingest_file(path, &self.ingest_cfg, chunk_size, chunk_overlap, &mut engine)
    }

    pub fn ingest_dir(&self, root: &Path) -> Result<(IngestReport, Vec<IngestOutcome>)> {
        let (chunk_size, chunk_overlap) = self.chunking();
        let mut engine = self.engine.write().unwrap();
        ingest::ingest_dir(root, &self.ingest_cfg, chunk_size, chunk_overlap, &mut engine)
    }

    pub fn delete_document(&self, document_id: &str) -> usize {
        self.engine.write().unwrap().delete_document(document_id)
    }

    pub fn clear(&self) {
        self.engine.write().unwrap().clear();
    }

    fn chunking(&self) -> (usize, usize) {
        let rag = self.rag.read().unwrap();
        (rag.chunk_size, rag.chunk_overlap)
    }

    // ============ Configuration ============

    pub fn update_config(&self, update: &RagConfigUpdate) -> UpdateReport {
        self.rag.write().unwrap().apply_update(update)
    }

    pub fn config(&self) -> ConfigReport {
        ConfigReport {
            rag: self.rag.read().unwrap().clone(),
            vectorizer: self.engine.read().unwrap().vectorizer_info(),
            supported_formats: self.ingest_cfg.supported_formats.clone(),
        }
    }

    // ============ Stats, usage, health ============

    pub fn stats(&self) -> SystemStats {
        let engine = self.engine.read().unwrap();
        SystemStats {
            index: engine.index_stats(),
            vectorizer: engine.vectorizer_info(),
            model: self.client.model_name().to_string(),
            config: self.rag.read().unwrap().clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn usage(&self) -> Result<UsageReport> {
        self.ledger.usage()
    }

    pub fn usage_history(&self) -> std::collections::BTreeMap<chrono::NaiveDate, u64> {
        self.ledger.history()
    }

    pub fn reset_usage(&self) -> Result<()> {
        self.ledger.reset()
    }

    pub async fn check_health(&self) -> bool {
        self.client.check_api_health().await
    }
}

fn preview(content: &str) -> String {
    let truncated: String = content.chars().take(SOURCE_PREVIEW_CHARS).collect();
    if truncated.chars().count() < content.chars().count() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
