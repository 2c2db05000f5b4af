//! Retrieval over the indexed corpus.
//!
//! [`RetrievalEngine`] owns the vectorizer and the vector index together, so
//! vocabulary swaps and index mutations are fenced by whichever lock guards
//! the engine as a whole (see [`RagService`](crate::service::RagService)).
//!
//! Two search paths:
//!
//! - **Precise** ([`search_precise`](RetrievalEngine::search_precise)) —
//!   sparse cosine similarity between the query and every stored chunk text,
//!   re-derived through the vectorizer at full vocabulary resolution. This
//!   is the primary query path; ranking quality depends on it.
//! - **Dense** ([`search_dense`](RetrievalEngine::search_dense)) — inner
//!   product over the index's lossy fixed-dimension projections, for callers
//!   that hand the system an opaque vector instead of text.

use anyhow::Result;

use crate::index::{EntrySeed, VectorIndex};
use crate::models::{Chunk, Document, IndexEntry, IndexStats, SearchResult};
use crate::projector;
use crate::vectorizer::{TermWeightVectorizer, VectorizerInfo};

pub struct RetrievalEngine {
    vectorizer: TermWeightVectorizer,
    index: VectorIndex,
    dense_dim: usize,
}

impl RetrievalEngine {
    /// Assemble an engine from its parts.
    ///
    /// If the index was loaded from disk with entries but the vectorizer is
    /// unfitted (the vocabulary is not persisted), the vectorizer is refit
    /// over the retained chunk texts so the precise path works immediately.
    pub fn new(
        mut vectorizer: TermWeightVectorizer,
        index: VectorIndex,
        dense_dim: usize,
    ) -> Self {
        if !vectorizer.is_fitted() && !index.is_empty() {
            let texts: Vec<String> = index.entries().map(|e| e.content.clone()).collect();
            match vectorizer.fit(&texts) {
                Ok(()) => tracing::info!(chunks = texts.len(), "refit vectorizer from loaded index"),
                Err(e) => tracing::warn!(error = %e, "could not refit vectorizer from loaded index"),
            }
        }
        Self {
            vectorizer,
            index,
            dense_dim,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn is_fitted(&self) -> bool {
        self.vectorizer.is_fitted()
    }

    /// Index a document's chunks: fit (first batch only), transform,
    /// project, add. Returns the number of vectors added.
    pub fn index_document(&mut self, document: &Document, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        if !self.vectorizer.is_fitted() {
            self.vectorizer.fit(&texts)?;
        }
        let sparse = self.vectorizer.transform(&texts)?;
        let dense: Vec<Vec<f32>> = sparse
            .iter()
            .map(|sv| projector::project(sv, self.dense_dim))
            .collect();

        let seeds: Vec<EntrySeed> = chunks
            .iter()
            .map(|chunk| {
                let mut metadata = chunk.metadata.clone();
                metadata.insert("char_start".into(), chunk.char_start.to_string());
                metadata.insert("char_end".into(), chunk.char_end.to_string());
                metadata.insert("content_hash".into(), document.content_hash.clone());
                EntrySeed {
                    document_id: document.id.clone(),
                    document_name: document.filename.clone(),
                    chunk_index: chunk.chunk_index,
                    content: chunk.content.clone(),
                    metadata,
                }
            })
            .collect();

        let added = self.index.add(seeds, dense)?;
        Ok(added.len())
    }

    /// Precise sparse cosine search over all stored chunk texts.
    ///
    /// Requires a fitted vectorizer; use
    /// [`search_precise_lazy`](Self::search_precise_lazy) when a degraded
    /// lazy fit is acceptable. An empty index yields an empty list.
    pub fn search_precise(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        if self.index.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let query_sparse = &self.vectorizer.transform(&[query.to_string()])?[0];

        let entries: Vec<&IndexEntry> = self.index.entries().collect();
        let texts: Vec<String> = entries.iter().map(|e| e.content.clone()).collect();
        let chunk_sparse = self.vectorizer.transform(&texts)?;

        let mut results: Vec<SearchResult> = entries
            .iter()
            .zip(chunk_sparse.iter())
            .map(|(&entry, sv)| to_result(entry, query_sparse.cosine(sv)))
            .collect();
        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);

        tracing::debug!(results = results.len(), "precise search complete");
        Ok(results)
    }

    /// Precise search that lazily fits an unfitted vectorizer over the
    /// stored corpus first — degraded behavior, logged, not an error.
    pub fn search_precise_lazy(&mut self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        if !self.vectorizer.is_fitted() && !self.index.is_empty() {
            tracing::warn!("vectorizer not fitted at query time; lazily fitting on stored corpus");
            let texts: Vec<String> = self.index.entries().map(|e| e.content.clone()).collect();
            self.vectorizer.fit(&texts)?;
        }
        self.search_precise(query, top_k)
    }

    /// Dense inner-product search for an opaque query vector.
    ///
    /// The query is truncated or zero-padded to the index dimension and
    /// L2-normalized before searching, mirroring how stored vectors were
    /// projected.
    pub fn search_dense(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if self.index.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let dim = self.index.dimension().unwrap_or(self.dense_dim);

        let mut fitted = vec![0.0f32; dim];
        for (slot, value) in fitted.iter_mut().zip(query.iter()) {
            *slot = *value;
        }
        projector::l2_normalize(&mut fitted);

        let hits = self.index.search(&fitted, top_k)?;
        Ok(hits
            .iter()
            .map(|(entry, score)| to_result(entry, *score))
            .collect())
    }

    pub fn delete_document(&mut self, document_id: &str) -> usize {
        self.index.delete_by_document(document_id)
    }

    /// Drop all indexed data and reset the vectorizer fit state, so the
    /// next add triggers a fresh fit.
    pub fn clear(&mut self) {
        self.index.clear();
        self.vectorizer.reset();
    }

    pub fn index_stats(&self) -> IndexStats {
        self.index.stats()
    }

    pub fn vectorizer_info(&self) -> VectorizerInfo {
        self.vectorizer.info()
    }

    /// `(document_id, content_hash)` for an already-indexed filename, if any.
    pub fn document_by_name(&self, filename: &str) -> Option<(String, String)> {
        self.index.entries().find(|e| e.document_name == filename).map(|e| {
            (
                e.document_id.clone(),
                e.metadata.get("content_hash").cloned().unwrap_or_default(),
            )
        })
    }
}

fn to_result(entry: &IndexEntry, similarity: f32) -> SearchResult {
    SearchResult {
        entry_id: entry.id,
        document_id: entry.document_id.clone(),
        document_name: entry.document_name.clone(),
        chunk_index: entry.chunk_index,
        content: entry.content.clone(),
        similarity,
        metadata: entry.metadata.clone(),
    }
}
