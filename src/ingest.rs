//! Ingestion pipeline orchestration.
//!
//! Drives the document lifecycle: `Pending` on creation, `Processing` once
//! text extraction starts, then `Completed` (chunks split and indexed) or
//! `Failed` (error recorded, nothing indexed). Extraction failures are
//! per-document, never fatal to the process.
//!
//! Re-ingesting a filename that is already indexed replaces its chunks;
//! if the extracted text's hash is unchanged the reindex is skipped.

use std::path::Path;

use anyhow::{bail, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::extract;
use crate::models::{Document, DocumentStatus};
use crate::retrieval::RetrievalEngine;
use crate::splitter::split_text;

/// Per-file ingestion outcome.
#[derive(Debug)]
pub struct IngestOutcome {
    pub document: Document,
    pub chunks_indexed: usize,
    /// Content hash matched an already-indexed copy; nothing was re-done.
    pub skipped_unchanged: bool,
    /// An older copy of this filename was deleted first.
    pub replaced: bool,
}

/// Aggregate counters for a directory ingest.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub files_seen: usize,
    pub ingested: usize,
    pub skipped: usize,
    pub failed: usize,
    pub chunks_written: usize,
}

/// Ingest a single file into the engine.
///
/// Returns `Ok` with a `Failed` document for per-file problems (unsupported
/// format, size limit, extraction error); `Err` only for caller mistakes
/// such as an invalid chunking configuration.
pub fn ingest_file(
    path: &Path,
    ingest: &IngestConfig,
    chunk_size: usize,
    chunk_overlap: usize,
    engine: &mut RetrievalEngine,
) -> Result<IngestOutcome> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let format = extract::detect_format(path).unwrap_or_default();
    let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    let mut document = Document {
        id: Uuid::new_v4().to_string(),
        filename: filename.clone(),
        format: format.clone(),
        size_bytes,
        status: DocumentStatus::Pending,
        text_length: 0,
        chunk_count: 0,
        content_hash: String::new(),
        error: None,
        created_at: Utc::now(),
    };

    if !ingest.supported_formats.iter().any(|f| f == &format) {
        return Ok(fail(document, format!("unsupported format: {}", format)));
    }
    let max_bytes = ingest.max_file_size_mb * 1024 * 1024;
    if size_bytes > max_bytes {
        return Ok(fail(
            document,
            format!("file size {} exceeds limit of {} bytes", size_bytes, max_bytes),
        ));
    }

    document.status = DocumentStatus::Processing;
    let text = match extract::extract_text(path, &format) {
        Ok(text) => text,
        Err(e) => return Ok(fail(document, e.to_string())),
    };

    document.text_length = text.chars().count();
    document.content_hash = {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    };

    // Replace-on-reingest: an indexed copy of this filename either short-
    // circuits (same hash) or is deleted before the fresh index.
    let mut replaced = false;
    if let Some((existing_id, existing_hash)) = engine.document_by_name(&filename) {
        if existing_hash == document.content_hash {
            tracing::info!(filename = filename.as_str(), "unchanged; skipping reindex");
            document.id = existing_id;
            document.status = DocumentStatus::Completed;
            return Ok(IngestOutcome {
                document,
                chunks_indexed: 0,
                skipped_unchanged: true,
                replaced: false,
            });
        }
        let removed = engine.delete_document(&existing_id);
        tracing::info!(
            filename = filename.as_str(),
            removed,
            "replacing previously indexed document"
        );
        replaced = true;
    }

    let chunks = split_text(&document.id, &text, chunk_size, chunk_overlap)?;
    let chunks_indexed = match engine.index_document(&document, &chunks) {
        Ok(count) => count,
        Err(e) => return Ok(fail(document, format!("indexing failed: {}", e))),
    };

    document.chunk_count = chunks_indexed;
    document.status = DocumentStatus::Completed;
    tracing::info!(
        filename = filename.as_str(),
        chars = document.text_length,
        chunks = chunks_indexed,
        "ingested document"
    );

    Ok(IngestOutcome {
        document,
        chunks_indexed,
        skipped_unchanged: false,
        replaced,
    })
}

/// Walk a directory and ingest every matching file.
pub fn ingest_dir(
    root: &Path,
    ingest: &IngestConfig,
    chunk_size: usize,
    chunk_overlap: usize,
    engine: &mut RetrievalEngine,
) -> Result<(IngestReport, Vec<IngestOutcome>)> {
    if !root.exists() {
        bail!("ingest root does not exist: {}", root.display());
    }

    let include_set = build_globset(&ingest.include_globs)?;
    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(ingest.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        let format = extract::detect_format(path).unwrap_or_default();
        if !ingest.supported_formats.iter().any(|f| f == &format) {
            continue;
        }
        paths.push(path.to_path_buf());
    }
    // Deterministic ordering.
    paths.sort();

    let mut report = IngestReport::default();
    let mut outcomes = Vec::with_capacity(paths.len());

    for path in paths {
        report.files_seen += 1;
        let outcome = ingest_file(&path, ingest, chunk_size, chunk_overlap, engine)?;
        match outcome.document.status {
            DocumentStatus::Completed if outcome.skipped_unchanged => report.skipped += 1,
            DocumentStatus::Completed => {
                report.ingested += 1;
                report.chunks_written += outcome.chunks_indexed;
            }
            _ => report.failed += 1,
        }
        outcomes.push(outcome);
    }

    Ok((report, outcomes))
}

fn fail(mut document: Document, error: String) -> IngestOutcome {
    tracing::warn!(
        filename = document.filename.as_str(),
        error = error.as_str(),
        "document ingestion failed"
    );
    document.status = DocumentStatus::Failed;
    document.error = Some(error);
    IngestOutcome {
        document,
        chunks_indexed: 0,
        skipped_unchanged: false,
        replaced: false,
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::VectorIndex;
    use crate::vectorizer::TermWeightVectorizer;

    fn engine() -> RetrievalEngine {
        RetrievalEngine::new(
            TermWeightVectorizer::new(10_000, 1, 1.0),
            VectorIndex::in_memory(),
            64,
        )
    }

    fn config() -> IngestConfig {
        IngestConfig::default()
    }

    #[test]
    fn test_ingest_txt_file_completes_and_indexes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "Deployment requires two approvals. Rollback is automatic.").unwrap();

        let mut eng = engine();
        let outcome = ingest_file(&path, &config(), 500, 50, &mut eng).unwrap();

        assert_eq!(outcome.document.status, DocumentStatus::Completed);
        assert!(outcome.chunks_indexed > 0);
        assert_eq!(outcome.document.chunk_count, outcome.chunks_indexed);
        assert!(!outcome.document.content_hash.is_empty());

        let results = eng.search_precise("deployment approvals", 3).unwrap();
        assert_eq!(results[0].document_id, outcome.document.id);
    }

    #[test]
    fn test_unsupported_format_fails_without_indexing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("binary.exe");
        std::fs::write(&path, b"\x00\x01").unwrap();

        let mut eng = engine();
        let outcome = ingest_file(&path, &config(), 500, 50, &mut eng).unwrap();

        assert_eq!(outcome.document.status, DocumentStatus::Failed);
        assert!(outcome.document.error.as_deref().unwrap().contains("unsupported"));
        assert!(eng.is_empty());
    }

    #[test]
    fn test_oversized_file_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("big.txt");
        std::fs::write(&path, "x".repeat(2 * 1024 * 1024)).unwrap();

        let mut eng = engine();
        let mut cfg = config();
        cfg.max_file_size_mb = 1;
        let outcome = ingest_file(&path, &cfg, 500, 50, &mut eng).unwrap();

        assert_eq!(outcome.document.status, DocumentStatus::Failed);
        assert!(eng.is_empty());
    }

    #[test]
    fn test_reingest_unchanged_is_skipped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("same.txt");
        std::fs::write(&path, "Stable content that does not change.").unwrap();

        let mut eng = engine();
        let first = ingest_file(&path, &config(), 500, 50, &mut eng).unwrap();
        let second = ingest_file(&path, &config(), 500, 50, &mut eng).unwrap();

        assert!(second.skipped_unchanged);
        assert_eq!(second.document.id, first.document.id);
        assert_eq!(eng.index_stats().total_vectors, first.chunks_indexed);
    }

    #[test]
    fn test_reingest_changed_replaces_old_chunks() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("evolving.txt");
        std::fs::write(&path, "Original text about databases.").unwrap();

        let mut eng = engine();
        ingest_file(&path, &config(), 500, 50, &mut eng).unwrap();

        std::fs::write(&path, "Rewritten text about compilers.").unwrap();
        let outcome = ingest_file(&path, &config(), 500, 50, &mut eng).unwrap();

        assert!(outcome.replaced);
        assert_eq!(eng.index_stats().document_count, 1);
        let results = eng.search_precise("compilers", 3).unwrap();
        assert_eq!(results[0].document_id, outcome.document.id);
        assert!(results.iter().all(|r| !r.content.contains("databases")));
    }

    #[test]
    fn test_ingest_dir_applies_filters() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "Alpha file about Rust.").unwrap();
        std::fs::write(tmp.path().join("b.md"), "# Beta\n\nMarkdown about Python.").unwrap();
        std::fs::write(tmp.path().join("c.exe"), b"\x00").unwrap();
        std::fs::create_dir_all(tmp.path().join("target")).unwrap();
        std::fs::write(tmp.path().join("target/skip.txt"), "excluded by default").unwrap();

        let mut eng = engine();
        let (report, outcomes) =
            ingest_dir(tmp.path(), &config(), 500, 50, &mut eng).unwrap();

        assert_eq!(report.files_seen, 2);
        assert_eq!(report.ingested, 2);
        assert_eq!(report.failed, 0);
        assert!(report.chunks_written >= 2);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(eng.index_stats().document_count, 2);
    }

    #[test]
    fn test_ingest_dir_missing_root_is_an_error() {
        let mut eng = engine();
        assert!(ingest_dir(Path::new("/nonexistent/dir"), &config(), 500, 50, &mut eng).is_err());
    }
}
