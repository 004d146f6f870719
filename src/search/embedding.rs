//! Text encoders.

use std::hash::Hasher;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::info;
use twox_hash::XxHash64;

use super::index::l2_normalize;
use super::{Embedding, DEFAULT_MODEL, HASHING_DIM};
use crate::error::{Error, Result};

/// Produces fixed-length vectors for text.
#[async_trait]
pub trait TextEncoder: Send + Sync {
    /// Short identifier shown in `/health` and logs
    fn name(&self) -> &str;

    /// Encode a batch of texts, one vector per input, in order.
    async fn encode_batch(&self, texts: Vec<String>) -> Result<Vec<Embedding>>;

    /// Encode a single text.
    async fn encode(&self, text: &str) -> Result<Embedding> {
        self.encode_batch(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("encoder returned no vector".to_string()))
    }
}

/// Configuration for the pretrained text embedding service.
#[derive(Debug, Clone)]
pub struct EmbeddingServiceConfig {
    /// Where downloaded model files are cached
    pub cache_dir: Option<PathBuf>,
    /// Print download progress on first use
    pub show_download_progress: bool,
}

impl Default for EmbeddingServiceConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            show_download_progress: true,
        }
    }
}

/// Pretrained MiniLM sentence encoder run through FastEmbed.
pub struct EmbeddingService {
    model: Arc<TextEmbedding>,
}

impl EmbeddingService {
    /// Load (downloading on first use) the default model.
    pub fn new() -> Result<Self> {
        Self::with_config(EmbeddingServiceConfig::default())
    }

    /// Load the default model with custom options.
    pub fn with_config(config: EmbeddingServiceConfig) -> Result<Self> {
        let mut options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(config.show_download_progress);
        if let Some(dir) = config.cache_dir {
            options = options.with_cache_dir(dir);
        }
        let model = TextEmbedding::try_new(options)
            .map_err(|e| Error::Embedding(format!("failed to load {}: {}", DEFAULT_MODEL, e)))?;
        info!("Loaded text embedding model {}", DEFAULT_MODEL);
        Ok(Self {
            model: Arc::new(model),
        })
    }
}

#[async_trait]
impl TextEncoder for EmbeddingService {
    fn name(&self) -> &str {
        DEFAULT_MODEL
    }

    async fn encode_batch(&self, texts: Vec<String>) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || model.embed(texts, None))
            .await
            .map_err(|e| Error::Embedding(format!("embedding task failed: {}", e)))?
            .map_err(|e| Error::Embedding(e.to_string()))
    }
}

/// Local encoder hashing unigrams and bigrams into a fixed-size vector.
///
/// Needs no model download; similarity reflects shared vocabulary only.
#[derive(Debug, Clone)]
pub struct HashingTextEncoder {
    dim: usize,
}

impl Default for HashingTextEncoder {
    fn default() -> Self {
        Self { dim: HASHING_DIM }
    }
}

impl HashingTextEncoder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn tokens(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| {
                let t = t.to_lowercase();
                // crude plural folding: "tees" ~ "tee", "shoes" ~ "shoe"
                match t.strip_suffix('s') {
                    Some(stem) if stem.len() >= 3 && !stem.ends_with('s') => stem.to_string(),
                    _ => t,
                }
            })
            .collect()
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let mut hasher = XxHash64::with_seed(0x6d65_7263);
        hasher.write(feature.as_bytes());
        let hash = hasher.finish();
        let slot = (hash % self.dim as u64) as usize;
        let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
        vector[slot] += sign * weight;
    }

    /// Encode synchronously.
    pub fn encode_sync(&self, text: &str) -> Embedding {
        let tokens = Self::tokens(text);
        let mut vector = vec![0.0f32; self.dim];
        for token in &tokens {
            self.add_feature(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.add_feature(&mut vector, &format!("{} {}", pair[0], pair[1]), 0.5);
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl TextEncoder for HashingTextEncoder {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn encode_batch(&self, texts: Vec<String>) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| self.encode_sync(t)).collect())
    }
}
