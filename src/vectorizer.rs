//! Corpus term weighting over character n-grams.
//!
//! [`TermWeightVectorizer`] builds a vocabulary of 1- and 2-character n-grams
//! (per whitespace token, space-padded, lowercased — so it needs no
//! language-specific tokenization) and turns texts into L2-normalized sparse
//! term-weight vectors: sublinear term frequency scaled by smoothed inverse
//! document frequency.
//!
//! The vocabulary is replaced wholesale by [`fit`](TermWeightVectorizer::fit);
//! sparse vectors produced against an older vocabulary are invalidated by a
//! refit, so fits must be fenced from in-flight searches (the retrieval
//! engine holds both behind one lock).

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use serde::Serialize;

/// A sparse term-weight vector over the fitted vocabulary.
///
/// `terms` holds `(term_id, weight)` pairs sorted by term id; `dim` is the
/// vocabulary size at transform time. Rows are L2-normalized, so the dot
/// product of two sparse vectors is their cosine similarity.
#[derive(Debug, Clone)]
pub struct SparseVector {
    pub dim: usize,
    pub terms: Vec<(u32, f32)>,
}

impl SparseVector {
    /// Dot product via merge join over the sorted term ids.
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let mut sum = 0.0f32;
        let (mut i, mut j) = (0usize, 0usize);
        while i < self.terms.len() && j < other.terms.len() {
            match self.terms[i].0.cmp(&other.terms[j].0) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.terms[i].1 * other.terms[j].1;
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }

    pub fn norm(&self) -> f32 {
        self.terms
            .iter()
            .map(|(_, w)| w * w)
            .sum::<f32>()
            .sqrt()
    }

    /// Cosine similarity; safe on non-normalized or empty vectors.
    pub fn cosine(&self, other: &SparseVector) -> f32 {
        let denom = self.norm() * other.norm();
        if denom < f32::EPSILON {
            return 0.0;
        }
        self.dot(other) / denom
    }
}

/// Summary of the fitted state, surfaced by the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct VectorizerInfo {
    pub model_type: &'static str,
    pub vocabulary_size: usize,
    pub max_features: usize,
    pub min_df: usize,
    pub max_df: f64,
    pub ngram_range: &'static str,
}

/// TF-IDF-style vectorizer over character n-grams (range 1–2).
#[derive(Debug, Clone)]
pub struct TermWeightVectorizer {
    max_features: usize,
    /// Minimum document frequency (absolute count) for a term to survive.
    min_df: usize,
    /// Maximum document frequency (ratio of corpus) for a term to survive.
    max_df: f64,
    vocabulary: HashMap<String, u32>,
    idf: Vec<f32>,
    fitted: bool,
}

impl TermWeightVectorizer {
    pub fn new(max_features: usize, min_df: usize, max_df: f64) -> Self {
        Self {
            max_features,
            min_df,
            max_df,
            vocabulary: HashMap::new(),
            idf: Vec::new(),
            fitted: false,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    /// Drop the vocabulary and fit state; the next transform will need a
    /// fresh fit.
    pub fn reset(&mut self) {
        self.vocabulary.clear();
        self.idf.clear();
        self.fitted = false;
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn info(&self) -> VectorizerInfo {
        VectorizerInfo {
            model_type: "term-weight/char-ngram",
            vocabulary_size: self.vocabulary.len(),
            max_features: self.max_features,
            min_df: self.min_df,
            max_df: self.max_df,
            ngram_range: "1-2",
        }
    }

    /// Build (or replace) the vocabulary from `corpus`.
    ///
    /// Terms are pruned by document frequency (`min_df` absolute, `max_df`
    /// ratio), capped to `max_features` by total corpus frequency, and
    /// assigned ids in lexicographic order for determinism. IDF uses the
    /// smoothed form `ln((1 + n) / (1 + df)) + 1`.
    pub fn fit(&mut self, corpus: &[String]) -> Result<()> {
        if corpus.is_empty() {
            bail!("cannot fit vectorizer on an empty corpus");
        }

        let n_docs = corpus.len();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut corpus_freq: HashMap<String, u64> = HashMap::new();

        for text in corpus {
            let grams = char_ngrams(text);
            let mut seen: HashSet<&str> = HashSet::new();
            for gram in &grams {
                *corpus_freq.entry(gram.clone()).or_insert(0) += 1;
                if seen.insert(gram.as_str()) {
                    *doc_freq.entry(gram.clone()).or_insert(0) += 1;
                }
            }
        }

        let mut survivors: Vec<(String, usize)> = doc_freq
            .into_iter()
            .filter(|(_, df)| {
                *df >= self.min_df && (*df as f64 / n_docs as f64) <= self.max_df
            })
            .collect();

        if survivors.len() > self.max_features {
            // Keep the most frequent terms; ties break lexicographically so
            // the vocabulary is stable across runs.
            survivors.sort_by(|a, b| {
                let fa = corpus_freq.get(&a.0).copied().unwrap_or(0);
                let fb = corpus_freq.get(&b.0).copied().unwrap_or(0);
                fb.cmp(&fa).then_with(|| a.0.cmp(&b.0))
            });
            survivors.truncate(self.max_features);
        }

        survivors.sort_by(|a, b| a.0.cmp(&b.0));

        self.vocabulary = HashMap::with_capacity(survivors.len());
        self.idf = Vec::with_capacity(survivors.len());
        for (id, (term, df)) in survivors.into_iter().enumerate() {
            self.vocabulary.insert(term, id as u32);
            self.idf
                .push((((1 + n_docs) as f32) / ((1 + df) as f32)).ln() + 1.0);
        }
        self.fitted = true;

        tracing::info!(
            documents = n_docs,
            vocabulary = self.vocabulary.len(),
            "fitted term-weight vectorizer"
        );
        Ok(())
    }

    /// Transform texts into sparse vectors against the fitted vocabulary.
    ///
    /// Errors if [`fit`](Self::fit) has not run; callers that can tolerate a
    /// degraded vocabulary should use [`transform_or_fit`](Self::transform_or_fit).
    pub fn transform(&self, texts: &[String]) -> Result<Vec<SparseVector>> {
        if !self.fitted {
            bail!("vectorizer has not been fitted");
        }
        Ok(texts.iter().map(|t| self.transform_one(t)).collect())
    }

    /// Transform, lazily fitting on the given batch when never fitted.
    ///
    /// The lazy fit is a degraded fallback (the vocabulary then reflects only
    /// this batch), logged as such rather than treated as an error.
    pub fn transform_or_fit(&mut self, texts: &[String]) -> Result<Vec<SparseVector>> {
        if !self.fitted {
            tracing::warn!(
                batch = texts.len(),
                "vectorizer used before fit; lazily fitting on the given batch"
            );
            self.fit(texts)?;
        }
        self.transform(texts)
    }

    fn transform_one(&self, text: &str) -> SparseVector {
        let mut tf: HashMap<u32, u32> = HashMap::new();
        for gram in char_ngrams(text) {
            if let Some(&id) = self.vocabulary.get(&gram) {
                *tf.entry(id).or_insert(0) += 1;
            }
        }

        let mut terms: Vec<(u32, f32)> = tf
            .into_iter()
            .map(|(id, count)| {
                // Sublinear TF: 1 + ln(tf).
                let weight = (1.0 + (count as f32).ln()) * self.idf[id as usize];
                (id, weight)
            })
            .collect();
        terms.sort_by_key(|(id, _)| *id);

        let norm = terms.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for term in &mut terms {
                term.1 /= norm;
            }
        }

        SparseVector {
            dim: self.vocabulary.len(),
            terms,
        }
    }
}

/// Character n-grams (n = 1, 2) per whitespace token, lowercased, with each
/// token padded by a single space on both sides so word edges are features.
fn char_ngrams(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut grams = Vec::new();

    for token in lowered.split_whitespace() {
        let padded: Vec<char> = std::iter::once(' ')
            .chain(token.chars())
            .chain(std::iter::once(' '))
            .collect();
        for n in 1..=2usize {
            for window in padded.windows(n) {
                grams.push(window.iter().collect::<String>());
            }
        }
    }

    grams
}
