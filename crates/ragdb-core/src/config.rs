//! Configuration loader, typed engine settings and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars.
//! Nested keys in the environment use `__`, e.g. `APP_ENGINE__LEXICAL__K1=1.5`.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Ok(Self { figment })
    }

    /// Load a single TOML file (plus `APP_*` overrides), ignoring `RUST_ENV`.
    pub fn from_file(path: &Path) -> Self {
        Self { figment: Figment::new().merge(Toml::file(path)).merge(Env::prefixed("APP_").split("__")) }
    }

    pub fn from_figment(figment: Figment) -> Self { Self { figment } }

    pub fn contains(&self, key: &str) -> bool { self.figment.find_value(key).is_ok() }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorMetric {
    #[default]
    Cosine,
    Dot,
    Euclidean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorMode {
    #[default]
    Exact,
    Ivf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FusionMethod {
    #[default]
    Rrf,
    Weighted,
}

/// What a second ingestion of a document already in flight does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SameDocumentPolicy {
    /// Queue behind the in-flight ingestion.
    #[default]
    Wait,
    /// Supersede it: the in-flight ingestion aborts before its commit.
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub min_chunk_chars: usize,
    pub respect_sentences: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_tokens: 512, overlap_tokens: 50, min_chunk_chars: 1, respect_sentences: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub dimension: usize,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dimension: 384, max_attempts: 3, initial_backoff_ms: 50, max_backoff_ms: 2000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalConfig {
    pub k1: f32,
    pub b: f32,
}

impl Default for LexicalConfig {
    fn default() -> Self { Self { k1: 1.2, b: 0.75 } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub dimension: usize,
    pub metric: VectorMetric,
    pub mode: VectorMode,
    /// Number of IVF partitions; 0 picks one from the corpus size.
    pub ivf_nlist: usize,
    pub ivf_nprobe: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self { dimension: 384, metric: VectorMetric::Cosine, mode: VectorMode::Exact, ivf_nlist: 0, ivf_nprobe: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Estimated Jaccard similarity at or above which a chunk is a near-duplicate.
    pub threshold: f64,
    pub cross_document: bool,
    pub num_hashes: usize,
    pub num_bands: usize,
    pub shingle_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { threshold: 0.85, cross_document: true, num_hashes: 128, num_bands: 32, shingle_size: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub method: FusionMethod,
    pub rrf_c: f64,
    pub lexical_weight: f64,
    pub vector_weight: f64,
    /// Each index is asked for `k * candidate_multiplier` hits before fusion.
    pub candidate_multiplier: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { method: FusionMethod::Rrf, rrf_c: 60.0, lexical_weight: 1.0, vector_weight: 1.0, candidate_multiplier: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IngestConfig {
    pub same_document_policy: SameDocumentPolicy,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
    pub checkpoint_every: usize,
}

impl Default for StorageConfig {
    fn default() -> Self { Self { data_dir: None, checkpoint_every: 64 } }
}

/// Search result cache. A `capacity` of 0 turns it off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: u64,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self { Self { capacity: 1024, ttl_secs: 3600 } }
}

/// Typed settings for the whole engine, read from the `engine` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub lexical: LexicalConfig,
    pub vector: VectorConfig,
    pub dedup: DedupConfig,
    pub fusion: FusionConfig,
    pub ingest: IngestConfig,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        let cfg: Self = if config.contains("engine") {
            config.get("engine").map_err(|e| Error::InvalidConfig(e.to_string()))?
        } else {
            Self::default()
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults with embedding and vector dimension set to `dim`.
    pub fn with_dimension(dim: usize) -> Self {
        let mut cfg = Self::default();
        cfg.embedding.dimension = dim;
        cfg.vector.dimension = dim;
        cfg
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));
        if self.embedding.dimension == 0 { return invalid("embedding.dimension must be > 0".into()); }
        if self.embedding.dimension != self.vector.dimension {
            return invalid(format!("embedding.dimension ({}) != vector.dimension ({})", self.embedding.dimension, self.vector.dimension));
        }
        if self.embedding.max_attempts == 0 { return invalid("embedding.max_attempts must be >= 1".into()); }
        if self.chunking.max_tokens == 0 { return invalid("chunking.max_tokens must be > 0".into()); }
        if self.chunking.overlap_tokens >= self.chunking.max_tokens {
            return invalid(format!("chunking.overlap_tokens ({}) must be < max_tokens ({})", self.chunking.overlap_tokens, self.chunking.max_tokens));
        }
        if !(self.dedup.threshold > 0.0 && self.dedup.threshold <= 1.0) { return invalid(format!("dedup.threshold {} outside (0, 1]", self.dedup.threshold)); }
        if self.dedup.num_hashes == 0 || self.dedup.num_bands == 0 || self.dedup.num_hashes % self.dedup.num_bands != 0 {
            return invalid(format!("dedup.num_hashes ({}) must be a non-zero multiple of num_bands ({})", self.dedup.num_hashes, self.dedup.num_bands));
        }
        if self.dedup.shingle_size == 0 { return invalid("dedup.shingle_size must be > 0".into()); }
        if !self.lexical.k1.is_finite() || self.lexical.k1 < 0.0 { return invalid(format!("lexical.k1 {} must be finite and >= 0", self.lexical.k1)); }
        if !(0.0..=1.0).contains(&self.lexical.b) { return invalid(format!("lexical.b {} outside [0, 1]", self.lexical.b)); }
        if !self.fusion.rrf_c.is_finite() || self.fusion.rrf_c < 0.0 { return invalid(format!("fusion.rrf_c {} must be finite and >= 0", self.fusion.rrf_c)); }
        for (name, w) in [("lexical_weight", self.fusion.lexical_weight), ("vector_weight", self.fusion.vector_weight)] {
            if !w.is_finite() || w < 0.0 { return invalid(format!("fusion.{name} {w} must be finite and >= 0")); }
        }
        if self.fusion.candidate_multiplier == 0 { return invalid("fusion.candidate_multiplier must be >= 1".into()); }
        if self.vector.mode == VectorMode::Ivf && self.vector.ivf_nprobe == 0 { return invalid("vector.ivf_nprobe must be >= 1".into()); }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
