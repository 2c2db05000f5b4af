//! Persistent flat inner-product vector index.
//!
//! Stores fixed-dimension dense vectors with attached [`IndexEntry`]
//! metadata, including each chunk's raw content (retained to serve the
//! precise sparse search path). Search is exhaustive inner product — with
//! L2-normalized vectors that equals cosine similarity.
//!
//! The underlying structure has no native deletion, so
//! [`delete_by_document`](VectorIndex::delete_by_document) rebuilds the
//! index from the survivors; O(N) in total index size, a documented
//! tradeoff at single-process scale.
//!
//! # Persistence
//!
//! Two co-located blobs under the index directory, written together:
//!
//! | File | Contents |
//! |------|----------|
//! | `vectors.bin` | row-major little-endian `f32` vector data |
//! | `metadata.json` | versioned: dimension, row ids, next id, entries |
//!
//! A missing `vectors.bin` means "no index yet", not an error. Save failures
//! are logged and swallowed: the index keeps serving from memory, fully
//! correct but non-durable across restarts.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::models::{IndexEntry, IndexStats};

const METADATA_VERSION: u32 = 1;
const VECTORS_FILE: &str = "vectors.bin";
const METADATA_FILE: &str = "metadata.json";

/// Entry data supplied on add; the index assigns the entry id.
#[derive(Debug, Clone)]
pub struct EntrySeed {
    pub document_id: String,
    pub document_name: String,
    pub chunk_index: usize,
    pub content: String,
    pub metadata: std::collections::BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize)]
struct MetadataBlob {
    version: u32,
    dim: Option<usize>,
    next_id: u64,
    ids: Vec<u64>,
    entries: Vec<IndexEntry>,
}

/// Flat inner-product index with entry metadata and best-effort durability.
pub struct VectorIndex {
    dir: PathBuf,
    dim: Option<usize>,
    /// Row ids, parallel to `vectors`.
    ids: Vec<u64>,
    vectors: Vec<Vec<f32>>,
    entries: HashMap<u64, IndexEntry>,
    next_id: u64,
}

impl VectorIndex {
    /// Open (or create) the index rooted at `dir`.
    ///
    /// Loads existing blobs when present; a missing vectors blob yields an
    /// empty index. A corrupt or version-mismatched blob is logged and
    /// treated as empty rather than failing startup.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut index = Self {
            dir,
            dim: None,
            ids: Vec::new(),
            vectors: Vec::new(),
            entries: HashMap::new(),
            next_id: 0,
        };
        index.load();
        Ok(index)
    }

    /// An index with no backing directory; state lives in memory only.
    pub fn in_memory() -> Self {
        Self {
            dir: PathBuf::new(),
            dim: None,
            ids: Vec::new(),
            vectors: Vec::new(),
            entries: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dim
    }

    /// All stored entries, in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.ids.iter().filter_map(move |id| self.entries.get(id))
    }

    /// Append entries with their dense vectors.
    ///
    /// Vectors must already be L2-normalized. On the first add to an empty
    /// index the dimension is taken from the first vector; afterwards every
    /// vector must match it. Returns the assigned entry ids.
    pub fn add(&mut self, seeds: Vec<EntrySeed>, vectors: Vec<Vec<f32>>) -> Result<Vec<u64>> {
        if seeds.len() != vectors.len() {
            bail!(
                "entry/vector count mismatch: {} entries, {} vectors",
                seeds.len(),
                vectors.len()
            );
        }
        if seeds.is_empty() {
            return Ok(Vec::new());
        }

        let dim = match self.dim {
            Some(d) => d,
            None => {
                let d = vectors[0].len();
                if d == 0 {
                    bail!("cannot add zero-dimension vectors");
                }
                self.dim = Some(d);
                d
            }
        };

        for v in &vectors {
            if v.len() != dim {
                bail!(
                    "vector dimension {} does not match index dimension {}",
                    v.len(),
                    dim
                );
            }
        }

        let mut assigned = Vec::with_capacity(seeds.len());
        for (seed, vector) in seeds.into_iter().zip(vectors.into_iter()) {
            let id = self.next_id;
            self.next_id += 1;

            self.ids.push(id);
            self.vectors.push(vector);
            self.entries.insert(
                id,
                IndexEntry {
                    id,
                    document_id: seed.document_id,
                    document_name: seed.document_name,
                    chunk_index: seed.chunk_index,
                    content: seed.content,
                    metadata: seed.metadata,
                },
            );
            assigned.push(id);
        }

        self.persist();
        tracing::info!(
            added = assigned.len(),
            total = self.vectors.len(),
            "added vectors to index"
        );
        Ok(assigned)
    }

    /// Exhaustive inner-product search; returns up to `k` results, best
    /// first. An empty index yields an empty list, not an error.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(IndexEntry, f32)>> {
        if self.vectors.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let dim = self.dim.unwrap_or(0);
        if query.len() != dim {
            bail!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                dim
            );
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(row, v)| (row, dot(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .filter_map(|(row, score)| {
                self.entries
                    .get(&self.ids[row])
                    .map(|e| (e.clone(), score))
            })
            .collect())
    }

    /// Remove every entry belonging to `document_id`, returning the count.
    ///
    /// The flat structure has no in-place delete: survivors are collected
    /// and re-inserted into a fresh structure of the same dimension.
    pub fn delete_by_document(&mut self, document_id: &str) -> usize {
        let doomed: HashSet<u64> = self
            .entries
            .values()
            .filter(|e| e.document_id == document_id)
            .map(|e| e.id)
            .collect();
        if doomed.is_empty() {
            return 0;
        }

        let mut ids = Vec::with_capacity(self.ids.len() - doomed.len());
        let mut vectors = Vec::with_capacity(self.ids.len() - doomed.len());
        for (id, vector) in self.ids.iter().zip(self.vectors.drain(..)) {
            if !doomed.contains(id) {
                ids.push(*id);
                vectors.push(vector);
            }
        }
        self.ids = ids;
        self.vectors = vectors;
        self.entries.retain(|id, _| !doomed.contains(id));

        self.persist();
        tracing::info!(
            document_id,
            removed = doomed.len(),
            remaining = self.vectors.len(),
            "deleted document from index"
        );
        doomed.len()
    }

    /// Drop all vectors, metadata, and retained content.
    pub fn clear(&mut self) {
        self.dim = None;
        self.ids.clear();
        self.vectors.clear();
        self.entries.clear();
        self.next_id = 0;
        self.persist();
        tracing::info!("cleared vector index");
    }

    pub fn stats(&self) -> IndexStats {
        let document_count = self
            .entries
            .values()
            .map(|e| e.document_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        IndexStats {
            total_vectors: self.vectors.len(),
            dimension: self.dim.unwrap_or(0),
            document_count,
        }
    }

    // ============ Persistence ============

    /// Write both blobs. Failures are logged and swallowed: the in-memory
    /// index stays fully correct, just non-durable across restarts.
    fn persist(&self) {
        if self.dir.as_os_str().is_empty() {
            return;
        }
        if let Err(e) = self.try_persist() {
            tracing::warn!(error = %e, dir = %self.dir.display(), "could not save index; continuing in-memory");
        }
    }

    fn try_persist(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let mut blob = Vec::with_capacity(self.vectors.len() * self.dim.unwrap_or(0) * 4);
        for vector in &self.vectors {
            for &v in vector {
                blob.extend_from_slice(&v.to_le_bytes());
            }
        }
        std::fs::write(self.dir.join(VECTORS_FILE), blob)?;

        let meta = MetadataBlob {
            version: METADATA_VERSION,
            dim: self.dim,
            next_id: self.next_id,
            ids: self.ids.clone(),
            entries: self.entries.values().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&meta)?;
        std::fs::write(self.dir.join(METADATA_FILE), json)?;
        Ok(())
    }

    fn load(&mut self) {
        let vectors_path = self.dir.join(VECTORS_FILE);
        if !vectors_path.exists() {
            tracing::debug!(dir = %self.dir.display(), "no existing index");
            return;
        }
        match self.try_load(&vectors_path) {
            Ok(()) => {
                tracing::info!(
                    vectors = self.vectors.len(),
                    entries = self.entries.len(),
                    "loaded vector index"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load index; starting empty");
                self.dim = None;
                self.ids.clear();
                self.vectors.clear();
                self.entries.clear();
                self.next_id = 0;
            }
        }
    }

    fn try_load(&mut self, vectors_path: &Path) -> Result<()> {
        let meta_bytes = std::fs::read(self.dir.join(METADATA_FILE))?;
        let meta: MetadataBlob = serde_json::from_slice(&meta_bytes)?;
        if meta.version != METADATA_VERSION {
            bail!(
                "unsupported index metadata version {} (expected {})",
                meta.version,
                METADATA_VERSION
            );
        }

        let blob = std::fs::read(vectors_path)?;
        let dim = match meta.dim {
            Some(d) if d > 0 => d,
            _ if meta.ids.is_empty() => {
                // Empty index saved before any add.
                self.next_id = meta.next_id;
                return Ok(());
            }
            _ => bail!("metadata has rows but no dimension"),
        };

        if blob.len() != meta.ids.len() * dim * 4 {
            bail!(
                "vector blob size {} does not match {} rows of dimension {}",
                blob.len(),
                meta.ids.len(),
                dim
            );
        }

        let mut vectors = Vec::with_capacity(meta.ids.len());
        for row in blob.chunks_exact(dim * 4) {
            let vector: Vec<f32> = row
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            vectors.push(vector);
        }

        self.dim = Some(dim);
        self.ids = meta.ids;
        self.vectors = vectors;
        self.entries = meta.entries.into_iter().map(|e| (e.id, e)).collect();
        self.next_id = meta.next_id;
        Ok(())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
