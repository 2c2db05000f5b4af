//! Core data models used throughout ragmill.
//!
//! These types represent the documents, chunks, vectors, and search results
//! that flow through the ingestion and retrieval pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an ingested document.
///
/// `Pending` on creation, `Processing` once text extraction starts.
/// `Completed` and `Failed` are terminal: `Completed` means the document's
/// chunks are indexed, `Failed` means nothing was indexed and the error is
/// recorded on the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A document tracked by the ingestion pipeline.
///
/// Immutable once `Completed`, except for deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub format: String,
    pub size_bytes: u64,
    pub status: DocumentStatus,
    /// Char length of the extracted (uncleaned) text.
    pub text_length: usize,
    pub chunk_count: usize,
    /// SHA-256 of the extracted text, for change detection on re-ingest.
    pub content_hash: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A contiguous segment of a document's cleaned text.
///
/// For a given document, chunks are ordered by `chunk_index` (0-based,
/// contiguous); `char_start` is monotonically non-decreasing and the union of
/// `[char_start, char_end)` ranges covers the cleaned text, with consecutive
/// ranges overlapping by at most the configured overlap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    /// Absolute offset into the cleaned source text.
    pub char_start: usize,
    pub char_end: usize,
    pub metadata: BTreeMap<String, String>,
}

/// Metadata attached to one vector in the [`VectorIndex`](crate::index::VectorIndex).
///
/// `id` is a monotonically increasing counter assigned by the index on add,
/// so entry identity never collides regardless of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: u64,
    pub document_id: String,
    pub document_name: String,
    pub chunk_index: usize,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

/// A ranked retrieval hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub entry_id: u64,
    pub document_id: String,
    pub document_name: String,
    pub chunk_index: usize,
    pub content: String,
    pub similarity: f32,
    pub metadata: BTreeMap<String, String>,
}

/// One prior turn of conversation supplied to [`ask`](crate::service::RagService::ask).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    /// `"user"` or `"assistant"`.
    pub role: String,
    pub content: String,
}

/// A trimmed source attribution returned with an answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub entry_id: u64,
    pub document_id: String,
    pub document_name: String,
    pub chunk_index: usize,
    pub similarity: f32,
    /// Content preview, truncated to 200 chars.
    pub content: String,
}

/// The outcome of a full ask round-trip.
#[derive(Debug, Clone, Serialize)]
pub struct AskOutcome {
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub model: String,
    pub retrieval_secs: f64,
    pub generation_secs: f64,
    pub total_secs: f64,
    pub tokens_used: Option<u64>,
}

/// Index-level statistics.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total_vectors: usize,
    pub dimension: usize,
    pub document_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_snake_case() {
        let s = serde_json::to_string(&DocumentStatus::Processing).unwrap();
        assert_eq!(s, "\"processing\"");
        let back: DocumentStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(back, DocumentStatus::Failed);
    }
}
