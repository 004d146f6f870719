//! Catalog search engine: text and image top-k over precomputed vectors.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use moka::future::Cache;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::embedding::TextEncoder;
use super::filters::SearchFilters;
use super::index::VectorIndex;
use super::rerank::{self, ImageProfile, Overrides, QueryProfile};
use super::vision::ImageEncoder;
use super::Embedding;
use crate::catalog::fallback::ImageFallbackChain;
use crate::catalog::{Catalog, Product};
use crate::config::{ImagesSection, NodeConfig, RerankSection};
use crate::error::{Error, Result};

/// Query used when a text search arrives without any words.
pub const EMPTY_QUERY_FALLBACK: &str = "popular picks";

/// A product returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub product: Product,
    /// Relevance to the query, higher is better; absent for plain catalog listings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    /// Image URLs to try in order when rendering the product card
    pub image_candidates: Vec<String>,
}

impl SearchHit {
    /// Hit with a similarity score.
    pub fn scored(product: &Product, score: f32, images: &ImagesSection) -> Self {
        Self {
            product: product.clone(),
            score: Some(score),
            image_candidates: ImageFallbackChain::for_product(product, images).into_candidates(),
        }
    }

    /// Hit without a score.
    pub fn unscored(product: &Product, images: &ImagesSection) -> Self {
        Self {
            product: product.clone(),
            score: None,
            image_candidates: ImageFallbackChain::for_product(product, images).into_candidates(),
        }
    }
}

/// Search over an immutable catalog.
pub struct SearchEngine {
    catalog: Arc<Catalog>,
    text_encoder: Arc<dyn TextEncoder>,
    image_encoder: Option<Arc<dyn ImageEncoder>>,
    text_index: VectorIndex,
    image_index: VectorIndex,
    /// Color signatures for the image rerank, by catalog position
    image_profiles: Vec<Option<ImageProfile>>,
    rerank: RerankSection,
    query_cache: Cache<String, Embedding>,
    images: ImagesSection,
    default_top_k: usize,
    max_top_k: usize,
}

impl SearchEngine {
    /// Encode the catalog and build both indexes.
    ///
    /// Product images are read from `catalog.data_dir`. Products whose image
    /// is missing or undecodable get no image vector and never appear in
    /// image results. Color profiles for the rerank are taken from the same
    /// files, corrected by `<data_dir>/overrides.json`.
    pub async fn build(
        catalog: Arc<Catalog>,
        text_encoder: Arc<dyn TextEncoder>,
        image_encoder: Option<Arc<dyn ImageEncoder>>,
        config: &NodeConfig,
    ) -> Result<Self> {
        let started = Instant::now();
        let blobs: Vec<String> = catalog.products().iter().map(Product::text_blob).collect();
        let text_vectors = text_encoder.encode_batch(blobs).await?;
        if text_vectors.len() != catalog.len() {
            return Err(Error::Embedding(format!(
                "text encoder returned {} vectors for {} products",
                text_vectors.len(),
                catalog.len()
            )));
        }
        let text_index = VectorIndex::new(text_vectors.into_iter().map(Some).collect());

        let (image_index, image_profiles) = match &image_encoder {
            Some(encoder) => {
                let overrides = Arc::new(rerank::load_overrides(&config.catalog.data_dir));
                let mut vectors = Vec::with_capacity(catalog.len());
                let mut profiles = Vec::with_capacity(catalog.len());
                for product in catalog.products() {
                    let (vector, profile) = Self::index_product_image(
                        encoder.as_ref(),
                        product,
                        &overrides,
                        config,
                    )
                    .await;
                    vectors.push(vector);
                    profiles.push(profile);
                }
                let index = VectorIndex::new(vectors);
                info!(
                    "Indexed {}/{} product images with {}",
                    index.indexed_count(),
                    catalog.len(),
                    encoder.name()
                );
                (index, profiles)
            }
            None => {
                info!("Image search disabled, skipping image index");
                (VectorIndex::default(), Vec::new())
            }
        };

        info!(
            "Search engine ready: {} products, text encoder {}, built in {:?}",
            catalog.len(),
            text_encoder.name(),
            started.elapsed()
        );

        Ok(Self {
            catalog,
            text_encoder,
            image_encoder,
            text_index,
            image_index,
            image_profiles,
            rerank: config.vision.rerank.clone(),
            query_cache: Cache::new(config.search.cache_capacity),
            images: config.images.clone(),
            default_top_k: config.search.default_top_k,
            max_top_k: config.search.max_top_k,
        })
    }

    async fn index_product_image(
        encoder: &dyn ImageEncoder,
        product: &Product,
        overrides: &Arc<Overrides>,
        config: &NodeConfig,
    ) -> (Option<Embedding>, Option<ImageProfile>) {
        let Some(path) = product.local_image_path(&config.catalog.data_dir) else {
            return (None, None);
        };
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("No image for {} at {}: {}", product.id, path.display(), e);
                return (None, None);
            }
        };
        let vector = match encoder.encode(bytes.clone()).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!("Failed to encode image for {}: {}", product.id, e);
                return (None, None);
            }
        };
        if !config.vision.rerank.enabled {
            return (Some(vector), None);
        }

        let owned = product.clone();
        let overrides = Arc::clone(overrides);
        let profile = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&bytes)
                .ok()
                .map(|img| ImageProfile::of(&owned, &img, &overrides))
        })
        .await
        .ok()
        .flatten();
        (Some(vector), profile)
    }

    async fn query_profile(bytes: Vec<u8>) -> Result<QueryProfile> {
        tokio::task::spawn_blocking(move || {
            let img = image::load_from_memory(&bytes)
                .map_err(|e| Error::InvalidImage(e.to_string()))?;
            Ok(QueryProfile::of(&img))
        })
        .await
        .map_err(|e| Error::Embedding(format!("profile task failed: {}", e)))?
    }

    /// The catalog being searched.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Image placeholders attached to hits.
    pub fn images(&self) -> &ImagesSection {
        &self.images
    }

    /// Name of the text encoder.
    pub fn text_encoder_name(&self) -> &str {
        self.text_encoder.name()
    }

    /// Name of the image encoder, if image search is enabled.
    pub fn image_encoder_name(&self) -> Option<&str> {
        self.image_encoder.as_deref().map(|e| e.name())
    }

    /// Whether image search is available.
    pub fn vision_enabled(&self) -> bool {
        self.image_encoder.is_some()
    }

    /// Apply the default and the upper bound to a requested result count.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` when `requested` is zero.
    pub fn resolve_k(&self, requested: Option<usize>) -> Result<usize> {
        match requested {
            None => Ok(self.default_top_k),
            Some(0) => Err(Error::InvalidRequest("k must be greater than 0".to_string())),
            Some(k) => Ok(k.min(self.max_top_k)),
        }
    }

    async fn query_embedding(&self, query: &str) -> Result<Embedding> {
        if let Some(vector) = self.query_cache.get(query).await {
            return Ok(vector);
        }
        let vector = self.text_encoder.encode(query).await?;
        self.query_cache
            .insert(query.to_string(), vector.clone())
            .await;
        Ok(vector)
    }

    /// Rank catalog products against a text query under hard filters.
    ///
    /// An empty query searches for [`EMPTY_QUERY_FALLBACK`].
    pub async fn search_text(
        &self,
        query: &str,
        filters: &SearchFilters,
        k: usize,
    ) -> Result<Vec<SearchHit>> {
        let started = Instant::now();
        let query = match query.trim() {
            "" => EMPTY_QUERY_FALLBACK,
            q => q,
        };
        let candidates = filters.candidates(&self.catalog);
        if candidates.is_empty() || k == 0 {
            debug!("No candidates for '{}' under {:?}", query, filters);
            return Ok(Vec::new());
        }

        let embedding = self.query_embedding(query).await?;
        let hits = self.collect(self.text_index.top_k(&embedding, candidates, k));

        histogram!("mercury_search_duration_seconds", "modality" => "text")
            .record(started.elapsed().as_secs_f64());
        debug!("Text search '{}' returned {} hits", query, hits.len());
        Ok(hits)
    }

    /// Rank catalog products against an encoded image, then rerank by color
    /// and category unless the rerank is disabled.
    ///
    /// Returns an empty list when image search is disabled.
    pub async fn search_image_bytes(&self, bytes: Vec<u8>, k: usize) -> Result<Vec<SearchHit>> {
        let Some(encoder) = &self.image_encoder else {
            return Ok(Vec::new());
        };
        let started = Instant::now();
        let ranked = if self.rerank.enabled {
            let query = Self::query_profile(bytes.clone()).await?;
            let embedding = encoder.encode(bytes).await?;
            let base = self
                .image_index
                .top_k_all(&embedding, self.image_index.len());
            let mut ranked = rerank::rerank(&base, &self.image_profiles, &query, &self.rerank);
            ranked.truncate(k);
            ranked
        } else {
            let embedding = encoder.encode(bytes).await?;
            self.image_index.top_k_all(&embedding, k)
        };
        let hits = self.collect(ranked);

        histogram!("mercury_search_duration_seconds", "modality" => "image")
            .record(started.elapsed().as_secs_f64());
        debug!("Image search returned {} hits", hits.len());
        Ok(hits)
    }

    /// Every product, unscored, in catalog order.
    pub fn catalog_items(&self) -> Vec<SearchHit> {
        self.catalog
            .products()
            .iter()
            .map(|p| SearchHit::unscored(p, &self.images))
            .collect()
    }

    fn collect(&self, ranked: Vec<(usize, f32)>) -> Vec<SearchHit> {
        ranked
            .into_iter()
            .filter_map(|(idx, score)| {
                self.catalog
                    .get(idx)
                    .map(|p| SearchHit::scored(p, score, &self.images))
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::tests::sample_catalog;
    use crate::catalog::Category;
    use crate::search::embedding::HashingTextEncoder;
    use crate::search::vision::tests::solid_png;
    use crate::search::vision::HsvHistogramEncoder;

    /// Engine over the sample catalog with local encoders and no images on disk.
    pub(crate) async fn text_engine() -> SearchEngine {
        let config = NodeConfig::default();
        SearchEngine::build(
            Arc::new(sample_catalog()),
            Arc::new(HashingTextEncoder::default()),
            None,
            &config,
        )
        .await
        .unwrap()
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.product.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_text_search_is_sorted_and_bounded() {
        let engine = text_engine().await;
        let hits = engine
            .search_text("running tee", &SearchFilters::default(), 3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits[0].product.category == Category::Tops);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score, "Scores must be non-increasing");
        }
    }

    #[tokio::test]
    async fn test_text_search_applies_filters() {
        let engine = text_engine().await;
        let filters = SearchFilters {
            category: Some(Category::Shoes),
            max_price: Some(80.0),
            ..Default::default()
        };
        let hits = engine.search_text("shoes", &filters, 10).await.unwrap();
        assert_eq!(ids(&hits), vec!["shoes-1"]);
    }

    #[tokio::test]
    async fn test_empty_query_still_returns_results() {
        let engine = text_engine().await;
        let hits = engine
            .search_text("   ", &SearchFilters::default(), 4)
            .await
            .unwrap();
        assert_eq!(hits.len(), 4);
    }

    #[tokio::test]
    async fn test_hits_carry_image_candidates() {
        let engine = text_engine().await;
        let hits = engine
            .search_text("tote", &SearchFilters::default(), 1)
            .await
            .unwrap();
        let hit = &hits[0];
        assert_eq!(hit.product.id, "bags-1");
        assert_eq!(
            hit.image_candidates,
            vec![
                "/data/bags/bags-1.jpg".to_string(),
                "/data/bags/placeholder.jpg".to_string(),
                "/data/placeholder.jpg".to_string(),
                "https://placehold.co/400x400?text=No+Image".to_string(),
            ]
        );
        let json = serde_json::to_value(hit).unwrap();
        assert_eq!(json["id"], "bags-1");
        assert!(json["score"].is_number());
    }

    #[tokio::test]
    async fn test_resolve_k() {
        let engine = text_engine().await;
        assert_eq!(engine.resolve_k(None).unwrap(), 8);
        assert_eq!(engine.resolve_k(Some(3)).unwrap(), 3);
        assert_eq!(engine.resolve_k(Some(500)).unwrap(), 50);
        assert!(matches!(
            engine.resolve_k(Some(0)),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_image_search_disabled_returns_nothing() {
        let engine = text_engine().await;
        assert!(!engine.vision_enabled());
        let hits = engine
            .search_image_bytes(solid_png(200, 10, 10), 5)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_image_search_ranks_by_color() {
        let dir = tempfile::tempdir().unwrap();
        let write = |rel: &str, png: Vec<u8>| {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, png).unwrap();
        };
        write("shoes/shoes-1.jpg", solid_png(220, 20, 20));
        write("bags/bags-2.jpg", solid_png(20, 40, 220));
        write("jackets/jackets-1.jpg", solid_png(30, 180, 40));

        let mut config = NodeConfig::default();
        config.catalog.data_dir = dir.path().to_path_buf();
        let engine = SearchEngine::build(
            Arc::new(sample_catalog()),
            Arc::new(HashingTextEncoder::default()),
            Some(Arc::new(HsvHistogramEncoder)),
            &config,
        )
        .await
        .unwrap();

        let hits = engine
            .search_image_bytes(solid_png(215, 25, 25), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3, "Products without images are skipped");
        assert_eq!(hits[0].product.id, "shoes-1");
    }

    /// Encoder that maps every image to the same vector, so only the rerank
    /// can tell products apart.
    struct FlatEncoder;

    #[async_trait::async_trait]
    impl ImageEncoder for FlatEncoder {
        fn name(&self) -> &str {
            "flat"
        }

        async fn encode(&self, bytes: Vec<u8>) -> Result<Embedding> {
            image::load_from_memory(&bytes).map_err(|e| Error::InvalidImage(e.to_string()))?;
            Ok(vec![1.0, 0.0])
        }
    }

    async fn flat_engine(rerank: bool, overrides: Option<&str>) -> (SearchEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let write = |rel: &str, bytes: Vec<u8>| {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, bytes).unwrap();
        };
        write("shoes/shoes-2.jpg", solid_png(20, 40, 220));
        write("bags/bags-1.jpg", solid_png(220, 20, 20));
        if let Some(raw) = overrides {
            write(rerank::OVERRIDES_FILE, raw.as_bytes().to_vec());
        }

        let mut config = NodeConfig::default();
        config.catalog.data_dir = dir.path().to_path_buf();
        config.vision.rerank.enabled = rerank;
        let engine = SearchEngine::build(
            Arc::new(sample_catalog()),
            Arc::new(HashingTextEncoder::default()),
            Some(Arc::new(FlatEncoder)),
            &config,
        )
        .await
        .unwrap();
        (engine, dir)
    }

    #[tokio::test]
    async fn test_rerank_breaks_embedding_tie_by_color() {
        let (plain, _dir) = flat_engine(false, None).await;
        let hits = plain
            .search_image_bytes(solid_png(215, 25, 25), 2)
            .await
            .unwrap();
        assert_eq!(ids(&hits), vec!["shoes-2", "bags-1"], "Ties keep catalog order");

        let (reranked, _dir) = flat_engine(true, None).await;
        let hits = reranked
            .search_image_bytes(solid_png(215, 25, 25), 2)
            .await
            .unwrap();
        assert_eq!(ids(&hits), vec!["bags-1", "shoes-2"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_rerank_honors_overrides() {
        let (engine, _dir) =
            flat_engine(true, Some(r#"{"shoes-2.jpg": {"color": "red"}}"#)).await;
        let position = |id: &str| {
            engine
                .catalog()
                .products()
                .iter()
                .position(|p| p.id == id)
                .unwrap()
        };
        let profile = engine.image_profiles[position("shoes-2")].as_ref().unwrap();
        assert_eq!(profile.color, "red");
        assert!(engine.image_profiles[position("caps-1")].is_none());
    }

    #[tokio::test]
    async fn test_image_search_rejects_undecodable_query() {
        let (engine, _dir) = flat_engine(true, None).await;
        let err = engine
            .search_image_bytes(b"not an image".to_vec(), 3)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_catalog_items_are_unscored() {
        let engine = text_engine().await;
        let items = engine.catalog_items();
        assert_eq!(items.len(), engine.catalog().len());
        assert!(items.iter().all(|i| i.score.is_none()));
    }
}
