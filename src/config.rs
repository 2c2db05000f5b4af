//! Configuration: the TOML startup surface and the runtime-mutable
//! [`RagConfig`].
//!
//! Startup settings (paths, vectorizer shape, generation backend, ingest
//! limits, daily token quota) are read once from a TOML file. The knobs a
//! running service may change — top_k, temperature, max_tokens, chunk_size,
//! chunk_overlap, similarity_threshold — live in [`RagConfig`] and are only
//! mutable through [`RagConfig::apply_update`], which validates each field
//! against its range and rejects bad fields individually without touching
//! the valid ones.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub vectorizer: VectorizerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("token_usage.json")
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorizerConfig {
    #[serde(default = "default_max_features")]
    pub max_features: usize,
    #[serde(default = "default_min_df")]
    pub min_df: usize,
    #[serde(default = "default_max_df")]
    pub max_df: f64,
    /// Fixed dimension of the dense index projections.
    #[serde(default = "default_dense_dim")]
    pub dense_dim: usize,
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self {
            max_features: default_max_features(),
            min_df: default_min_df(),
            max_df: default_max_df(),
            dense_dim: default_dense_dim(),
        }
    }
}

fn default_max_features() -> usize {
    10_000
}
fn default_min_df() -> usize {
    1
}
fn default_max_df() -> f64 {
    1.0
}
fn default_dense_dim() -> usize {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Results below this similarity are dropped before generation.
    /// Low by default — term-weight similarities are conservative.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_similarity_threshold() -> f64 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_daily_token_quota")]
    pub daily_token_quota: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            daily_token_quota: default_daily_token_quota(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.deepseek.com/v1".to_string()
}
fn default_model() -> String {
    "deepseek-chat".to_string()
}
fn default_api_key_env() -> String {
    "DEEPSEEK_API_KEY".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_daily_token_quota() -> u64 {
    2_000_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_supported_formats")]
    pub supported_formats: Vec<String>,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            supported_formats: default_supported_formats(),
            max_file_size_mb: default_max_file_size_mb(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_supported_formats() -> Vec<String> {
    ["pdf", "docx", "xlsx", "csv", "txt", "md"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_file_size_mb() -> u64 {
    50
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

impl Config {
    /// Runtime-mutable config seeded from the startup surface.
    pub fn rag_config(&self) -> RagConfig {
        RagConfig {
            top_k: self.retrieval.top_k,
            temperature: self.generation.temperature,
            max_tokens: self.generation.max_tokens,
            chunk_size: self.chunking.chunk_size,
            chunk_overlap: self.chunking.chunk_overlap,
            similarity_threshold: self.retrieval.similarity_threshold,
            model: self.generation.model.clone(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        anyhow::bail!("retrieval.similarity_threshold must be in [0.0, 1.0]");
    }
    if config.vectorizer.max_features == 0 {
        anyhow::bail!("vectorizer.max_features must be > 0");
    }
    if !(0.0..=1.0).contains(&config.vectorizer.max_df) {
        anyhow::bail!("vectorizer.max_df must be in [0.0, 1.0]");
    }
    if config.vectorizer.dense_dim == 0 {
        anyhow::bail!("vectorizer.dense_dim must be > 0");
    }
    if config.generation.daily_token_quota == 0 {
        anyhow::bail!("generation.daily_token_quota must be > 0");
    }

    Ok(config)
}

// ============ Runtime-mutable RAG configuration ============

/// The knobs mutable at runtime, validated against fixed ranges.
#[derive(Debug, Clone, Serialize)]
pub struct RagConfig {
    pub top_k: usize,
    pub temperature: f64,
    pub max_tokens: u32,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub similarity_threshold: f64,
    pub model: String,
}

/// A partial update; absent fields are untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RagConfigUpdate {
    pub top_k: Option<i64>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<i64>,
    pub chunk_size: Option<i64>,
    pub chunk_overlap: Option<i64>,
    pub similarity_threshold: Option<f64>,
}

/// What happened to each field of an update request.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub applied: Vec<String>,
    pub rejected: Vec<FieldRejection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldRejection {
    pub field: String,
    pub reason: String,
}

impl RagConfig {
    /// Apply a partial update. Each field is validated against its range;
    /// out-of-range fields are rejected individually while the remaining
    /// valid fields are applied atomically.
    pub fn apply_update(&mut self, update: &RagConfigUpdate) -> UpdateReport {
        let mut applied = Vec::new();
        let mut rejected = Vec::new();

        let mut next = self.clone();

        match update.top_k {
            Some(v) if (1..=20).contains(&v) => {
                next.top_k = v as usize;
                applied.push("top_k".to_string());
            }
            Some(v) => rejected.push(FieldRejection {
                field: "top_k".to_string(),
                reason: format!("{} outside [1, 20]", v),
            }),
            None => {}
        }

        match update.temperature {
            Some(v) if (0.0..=2.0).contains(&v) => {
                next.temperature = v;
                applied.push("temperature".to_string());
            }
            Some(v) => rejected.push(FieldRejection {
                field: "temperature".to_string(),
                reason: format!("{} outside [0.0, 2.0]", v),
            }),
            None => {}
        }

        match update.max_tokens {
            Some(v) if (100..=4000).contains(&v) => {
                next.max_tokens = v as u32;
                applied.push("max_tokens".to_string());
            }
            Some(v) => rejected.push(FieldRejection {
                field: "max_tokens".to_string(),
                reason: format!("{} outside [100, 4000]", v),
            }),
            None => {}
        }

        match update.chunk_size {
            Some(v) if (100..=5000).contains(&v) => {
                next.chunk_size = v as usize;
                applied.push("chunk_size".to_string());
            }
            Some(v) => rejected.push(FieldRejection {
                field: "chunk_size".to_string(),
                reason: format!("{} outside [100, 5000]", v),
            }),
            None => {}
        }

        match update.chunk_overlap {
            Some(v) if (0..=1000).contains(&v) => {
                next.chunk_overlap = v as usize;
                applied.push("chunk_overlap".to_string());
            }
            Some(v) => rejected.push(FieldRejection {
                field: "chunk_overlap".to_string(),
                reason: format!("{} outside [0, 1000]", v),
            }),
            None => {}
        }

        match update.similarity_threshold {
            Some(v) if (0.0..=1.0).contains(&v) => {
                next.similarity_threshold = v;
                applied.push("similarity_threshold".to_string());
            }
            Some(v) => rejected.push(FieldRejection {
                field: "similarity_threshold".to_string(),
                reason: format!("{} outside [0.0, 1.0]", v),
            }),
            None => {}
        }

        // Cross-field invariant: the splitter requires overlap < size.
        if next.chunk_overlap >= next.chunk_size {
            let reason = format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                next.chunk_overlap, next.chunk_size
            );
            for field in ["chunk_size", "chunk_overlap"] {
                if applied.iter().any(|f| f == field) {
                    applied.retain(|f| f != field);
                    rejected.push(FieldRejection {
                        field: field.to_string(),
                        reason: reason.clone(),
                    });
                }
            }
            next.chunk_size = self.chunk_size;
            next.chunk_overlap = self.chunk_overlap;
        }

        *self = next;
        for field in &applied {
            tracing::info!(field = field.as_str(), "updated rag config");
        }
        for rej in &rejected {
            tracing::warn!(field = rej.field.as_str(), reason = rej.reason.as_str(), "rejected config update");
        }

        UpdateReport { applied, rejected }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.vectorizer.dense_dim, 512);
        assert_eq!(config.generation.daily_token_quota, 2_000_000);
    }

    #[test]
    fn test_rag_config_seeds_from_startup_surface() {
        let config: Config = toml::from_str(
            r#"
            [chunking]
            chunk_size = 800
            chunk_overlap = 100

            [retrieval]
            top_k = 3
            "#,
        )
        .unwrap();
        let rag = config.rag_config();
        assert_eq!(rag.chunk_size, 800);
        assert_eq!(rag.chunk_overlap, 100);
        assert_eq!(rag.top_k, 3);
        assert_eq!(rag.model, "deepseek-chat");
    }

    #[test]
    fn test_update_applies_valid_fields() {
        let mut rag = Config::default().rag_config();
        let report = rag.apply_update(&RagConfigUpdate {
            top_k: Some(8),
            temperature: Some(1.2),
            ..Default::default()
        });
        assert_eq!(report.applied, vec!["top_k", "temperature"]);
        assert!(report.rejected.is_empty());
        assert_eq!(rag.top_k, 8);
        assert!((rag.temperature - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_update_rejects_out_of_range_field_individually() {
        let mut rag = Config::default().rag_config();
        let before_temp = rag.temperature;

        let report = rag.apply_update(&RagConfigUpdate {
            temperature: Some(5.0),
            top_k: Some(10),
            ..Default::default()
        });

        assert_eq!(report.applied, vec!["top_k"]);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].field, "temperature");
        // The invalid field left its value untouched; the valid one applied.
        assert!((rag.temperature - before_temp).abs() < 1e-9);
        assert_eq!(rag.top_k, 10);
    }

    #[test]
    fn test_update_rejects_overlap_not_below_size() {
        let mut rag = Config::default().rag_config();
        let report = rag.apply_update(&RagConfigUpdate {
            chunk_size: Some(200),
            chunk_overlap: Some(300),
            ..Default::default()
        });
        assert!(report.applied.is_empty());
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(rag.chunk_size, 1000);
        assert_eq!(rag.chunk_overlap, 200);
    }

    #[test]
    fn test_load_config_rejects_bad_values() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("ragmill.toml");

        std::fs::write(&path, "[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap();
        assert!(load_config(&path).is_err());

        std::fs::write(&path, "[retrieval]\nsimilarity_threshold = 1.5\n").unwrap();
        assert!(load_config(&path).is_err());

        std::fs::write(&path, "[chunking]\nchunk_size = 500\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.chunking.chunk_size, 500);
    }
}
