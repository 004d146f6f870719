//! Similarity search over the product catalog.
//!
//! Provides vector-based retrieval using:
//! - FastEmbed for text and image embeddings (ONNX-based, runs locally)
//! - Lightweight local encoders when the pretrained models are unavailable
//! - Brute-force cosine top-k with hard catalog filters
//! - A color-aware rerank of image results (dominant color, HSV histogram,
//!   category vote among the nearest neighbors)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌────────────────┐      ┌────────────────┐
//! │  Query text     │────▶│  TextEncoder   │      │  ImageEncoder  │◀──── image bytes
//! └─────────────────┘     │ (MiniLM / hash)│      │ (CLIP / HSV)   │
//!                         └───────┬────────┘      └───────┬────────┘
//!                                 │                       │
//!                                 ▼                       ▼
//!                         ┌──────────────┐        ┌──────────────┐
//!                         │ Text index   │        │ Image index  │
//!                         │ (catalog)    │        │ (catalog)    │
//!                         └──────┬───────┘        └──────┬───────┘
//!                                │                       │
//!                                └───────────┬───────────┘
//!                                            ▼
//!                                   ┌──────────────────┐
//!                                   │ SearchEngine     │
//!                                   │ filters + top-k  │
//!                                   └──────────────────┘
//! ```

pub mod embedding;
pub mod engine;
pub mod filters;
pub mod index;
pub mod rerank;
pub mod vision;

pub use embedding::{EmbeddingService, EmbeddingServiceConfig, HashingTextEncoder, TextEncoder};
pub use engine::{SearchEngine, SearchHit};
pub use filters::{normalize_color, SearchFilters};
pub use index::VectorIndex;
pub use vision::{FastEmbedImage, HsvHistogramEncoder, ImageEncoder, ImageModelKind};

/// A dense embedding vector.
pub type Embedding = Vec<f32>;

/// Default text embedding model (all-MiniLM-L6-v2 - 384 dimensions, good balance of speed/quality)
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Embedding dimension for the default model
pub const EMBEDDING_DIM: usize = 384;

/// Embedding dimension of the local hashing encoder
pub const HASHING_DIM: usize = 512;
