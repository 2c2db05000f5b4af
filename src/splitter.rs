//! Sentence-boundary-aware text chunker.
//!
//! Splits cleaned document text into overlapping [`Chunk`]s of roughly
//! `chunk_size` characters. When a window would cut mid-sentence, the cut
//! point is moved forward (up to a fixed lookahead) to the nearest
//! sentence-ending punctuation mark, so chunks stay readable on their own.
//!
//! Each chunk carries its absolute `[char_start, char_end)` range into the
//! cleaned text for traceability. Offsets are char offsets, not byte
//! offsets, so multi-byte text splits safely.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use uuid::Uuid;

use crate::models::Chunk;

/// How far past the raw window end to look for a sentence boundary.
const BOUNDARY_LOOKAHEAD: usize = 200;

/// Normalize whitespace before chunking: runs of spaces/tabs collapse to a
/// single space, each line is trimmed, and 3+ consecutive newlines collapse
/// to 2 (one blank line).
pub fn clean_text(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = 0usize;

    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run += 1;
            if blank_run == 1 {
                lines.push(String::new());
            }
        } else {
            blank_run = 0;
            lines.push(collapsed);
        }
    }

    lines.join("\n").trim().to_string()
}

/// Split `text` into overlapping, sentence-aligned chunks.
///
/// Preconditions: `chunk_size > 0` and `overlap < chunk_size` — violating
/// them fails fast, since a window that advances by `chunk_size - overlap`
/// would otherwise never move forward. Empty or whitespace-only input yields
/// an empty Vec.
pub fn split_text(
    document_id: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    if chunk_size == 0 {
        bail!("chunk_size must be > 0");
    }
    if overlap >= chunk_size {
        bail!(
            "chunk overlap ({}) must be smaller than chunk size ({})",
            overlap,
            chunk_size
        );
    }

    let cleaned = clean_text(text);
    let chars: Vec<char> = cleaned.chars().collect();
    if chars.is_empty() {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::new();
    let mut chunk_index = 0usize;
    let mut start = 0usize;

    while start < chars.len() {
        let mut end = (start + chunk_size).min(chars.len());

        // Prefer cutting at a sentence end just past the raw boundary.
        if end < chars.len() {
            if let Some(boundary) = find_sentence_boundary(&chars, end) {
                if boundary > start {
                    end = boundary;
                }
            }
        }

        let content: String = chars[start..end].iter().collect();
        let content = content.trim().to_string();
        if !content.is_empty() {
            chunks.push(Chunk {
                id: Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                chunk_index,
                content,
                char_start: start,
                char_end: end,
                metadata: BTreeMap::new(),
            });
            chunk_index += 1;
        }

        if end >= chars.len() {
            break;
        }
        // overlap < chunk_size <= end - start, so this always advances.
        start = end - overlap;
    }

    Ok(chunks)
}

/// Find a sentence end in `[position, position + BOUNDARY_LOOKAHEAD)`.
///
/// A sentence end is `.`, `!` or `?` followed by a space. Candidates whose
/// following word starts lowercase are skipped — those are usually
/// abbreviations, not sentence ends. Returns the index one past the
/// punctuation mark, or `None` if no candidate is found in the window.
fn find_sentence_boundary(chars: &[char], position: usize) -> Option<usize> {
    let window_end = (position + BOUNDARY_LOOKAHEAD).min(chars.len());

    for i in position..window_end {
        if !matches!(chars[i], '.' | '!' | '?') {
            continue;
        }
        if chars.get(i + 1).copied() != Some(' ') {
            continue;
        }
        if chars.get(i + 2).map(|c| c.is_lowercase()).unwrap_or(false) {
            continue;
        }
        return Some(i + 1);
    }

    None
}
