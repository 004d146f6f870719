//! Node configuration.
//!
//! Loaded from a TOML file (see `mercury init`), then overridden by
//! environment variables and finally by CLI flags.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::Category;
use crate::search::rerank;
use crate::error::{Error, Result};

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP API settings
    pub api: ApiSection,
    /// Catalog location
    pub catalog: CatalogSection,
    /// Text search settings
    pub search: SearchSection,
    /// Hosted chat settings
    pub chat: ChatSection,
    /// Image search settings
    pub vision: VisionSection,
    /// Image fallback chain settings
    pub images: ImagesSection,
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    /// Listen address, e.g. `0.0.0.0:8000`
    pub listen_address: String,
    /// Enable CORS
    pub cors_enabled: bool,
    /// Allowed origins (`*` allows any)
    pub cors_origins: Vec<String>,
    /// Maximum request body size in bytes (uploads)
    pub max_body_bytes: usize,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8000".to_string(),
            cors_enabled: true,
            cors_origins: vec!["*".to_string()],
            max_body_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Catalog location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSection {
    /// Directory holding `<category>/<image>` files, served under `/data`
    pub data_dir: PathBuf,
    /// Explicit catalog file; defaults to `<data_dir>/catalog.json`
    pub path: Option<PathBuf>,
    /// Re-point missing image paths at matching files under `data_dir` on load
    pub repair_paths: bool,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            path: None,
            repair_paths: true,
        }
    }
}

impl CatalogSection {
    /// Resolved catalog file path.
    pub fn catalog_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("catalog.json"))
    }
}

/// Text search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    /// Result count when a request does not specify one
    pub default_top_k: usize,
    /// Upper bound applied to any requested count
    pub max_top_k: usize,
    /// Use the hashing encoder instead of downloading a pretrained model
    pub local_embeddings: bool,
    /// Capacity of the query-embedding cache
    pub cache_capacity: u64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            default_top_k: 8,
            max_top_k: 50,
            local_embeddings: false,
            cache_capacity: 1024,
        }
    }
}

/// Hosted chat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    /// OpenAI key (`OPENAI_API_KEY`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    /// Google AI Studio key (`GOOGLE_API_KEY`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_api_key: Option<String>,
    /// OpenAI model override (`OPENAI_MODEL`)
    pub openai_model: Option<String>,
    /// OpenAI API base override (`OPENAI_BASE_URL`)
    pub openai_base_url: Option<String>,
    /// Gemini model override (`GEMINI_MODEL`)
    pub gemini_model: Option<String>,
    /// Gemini API base override (`GEMINI_BASE_URL`)
    pub gemini_base_url: Option<String>,
    /// Deadline for one hosted call
    pub timeout_secs: u64,
    /// Result count for chat-originated recommendations
    pub recommend_top_k: usize,
    /// Hosted calls allowed per minute before degrading to local replies
    pub requests_per_minute: u32,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            google_api_key: None,
            openai_model: None,
            openai_base_url: None,
            gemini_model: None,
            gemini_base_url: None,
            timeout_secs: 20,
            recommend_top_k: 12,
            requests_per_minute: 60,
        }
    }
}

/// Image search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSection {
    /// Disable to run without an image encoder (low-resource mode)
    pub enabled: bool,
    /// Encoder architecture (`IMAGE_MODEL`): `ViT-B-32`, `ViT-B-16`, `resnet50`, `nomic`, `hsv`
    pub model: String,
    /// Pretrained weights tag (`IMAGE_PRETRAINED`): `openai`, `unicom`, ...
    pub pretrained: String,
    /// Deadline for fetching a remote image
    pub fetch_timeout_secs: u64,
    /// Largest accepted image, uploaded or fetched
    pub max_image_bytes: usize,
    /// Color-aware second ranking pass
    pub rerank: RerankSection,
}

impl Default for VisionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "ViT-B-32".to_string(),
            pretrained: "openai".to_string(),
            fetch_timeout_secs: 8,
            max_image_bytes: 10 * 1024 * 1024,
            rerank: RerankSection::default(),
        }
    }
}

/// Weights of the image rerank pass. Each term is added to the embedding similarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankSection {
    /// Disable to rank by embedding similarity alone
    pub enabled: bool,
    /// Added when the product's color matches the query's dominant color
    pub color_bonus: f32,
    /// Scale of the HSV histogram intersection term
    pub histogram_weight: f32,
    /// Largest category prior, reached when every leading neighbor shares a category
    pub category_prior: f32,
    /// Extra prior for the most common category among the leading neighbors
    pub leading_category_bonus: f32,
    /// Number of leading neighbors that vote on the category prior
    pub prior_window: usize,
}

impl Default for RerankSection {
    fn default() -> Self {
        Self {
            enabled: true,
            color_bonus: rerank::DEFAULT_COLOR_BONUS,
            histogram_weight: rerank::DEFAULT_HISTOGRAM_WEIGHT,
            category_prior: rerank::DEFAULT_CATEGORY_PRIOR,
            leading_category_bonus: rerank::DEFAULT_LEADING_CATEGORY_BONUS,
            prior_window: rerank::DEFAULT_PRIOR_WINDOW,
        }
    }
}

/// Image fallback chain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesSection {
    /// Per-category placeholder shown when a product image fails, keyed by category name
    pub category_fallbacks: BTreeMap<String, String>,
    /// Last-resort images, tried in order
    pub generic_fallbacks: Vec<String>,
}

impl Default for ImagesSection {
    fn default() -> Self {
        let category_fallbacks = Category::ALL
            .iter()
            .map(|c| (c.as_str().to_string(), format!("/data/{}/placeholder.jpg", c.as_str())))
            .collect();
        Self {
            category_fallbacks,
            generic_fallbacks: vec![
                "/data/placeholder.jpg".to_string(),
                "https://placehold.co/400x400?text=No+Image".to_string(),
            ],
        }
    }
}

impl ImagesSection {
    /// Placeholder configured for a category, if any.
    pub fn category_fallback(&self, category: Category) -> Option<&str> {
        self.category_fallbacks
            .get(category.as_str())
            .map(String::as_str)
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: NodeConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("OPENAI_API_KEY") {
            self.chat.openai_api_key = Some(key);
        }
        if let Some(key) = get("GOOGLE_API_KEY") {
            self.chat.google_api_key = Some(key);
        }
        if let Some(model) = get("OPENAI_MODEL") {
            self.chat.openai_model = Some(model);
        }
        if let Some(base) = get("OPENAI_BASE_URL") {
            self.chat.openai_base_url = Some(base);
        }
        if let Some(model) = get("GEMINI_MODEL") {
            self.chat.gemini_model = Some(model);
        }
        if let Some(base) = get("GEMINI_BASE_URL") {
            self.chat.gemini_base_url = Some(base);
        }
        if let Some(model) = get("IMAGE_MODEL") {
            match model.to_ascii_lowercase().as_str() {
                "none" | "off" | "disabled" => self.vision.enabled = false,
                _ => self.vision.model = model,
            }
        }
        if let Some(pretrained) = get("IMAGE_PRETRAINED") {
            self.vision.pretrained = pretrained;
        }
        if let Some(dir) = get("MERCURY_DATA_DIR") {
            self.catalog.data_dir = PathBuf::from(dir);
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.search.default_top_k == 0 || self.search.max_top_k == 0 {
            return Err(Error::Config(
                "search.default_top_k and search.max_top_k must be greater than 0".to_string(),
            ));
        }
        if self.search.default_top_k > self.search.max_top_k {
            return Err(Error::Config(
                "search.default_top_k must not exceed search.max_top_k".to_string(),
            ));
        }
        if self.chat.timeout_secs == 0 || self.vision.fetch_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be greater than 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.search.default_top_k, 8);
        assert_eq!(
            config.catalog.catalog_path(),
            PathBuf::from("data/catalog.json")
        );
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = NodeConfig::default();
        config.api.listen_address = "127.0.0.1:9100".to_string();
        config.vision.enabled = false;
        config.save(&path).unwrap();

        let loaded = NodeConfig::load(&path).unwrap();
        assert_eq!(loaded.api.listen_address, "127.0.0.1:9100");
        assert!(!loaded.vision.enabled);
        assert_eq!(
            loaded.images.category_fallbacks.get(Category::Shoes.as_str()),
            Some(&"/data/shoes/placeholder.jpg".to_string())
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: NodeConfig = toml::from_str("[search]\ndefault_top_k = 4\n").unwrap();
        assert_eq!(config.search.default_top_k, 4);
        assert_eq!(config.search.max_top_k, 50);
        assert_eq!(config.chat.timeout_secs, 20);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-4o"),
            ("IMAGE_MODEL", "resnet50"),
            ("GOOGLE_API_KEY", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = NodeConfig::default();
        config.apply_env_with(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.chat.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.chat.openai_model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.vision.model, "resnet50");
        assert!(config.vision.enabled);
        assert!(
            config.chat.google_api_key.is_none(),
            "Blank variables should be ignored"
        );
    }

    #[test]
    fn test_openai_base_does_not_leak_into_gemini() {
        let vars: HashMap<&str, &str> = [
            ("GOOGLE_API_KEY", "g-key"),
            ("OPENAI_BASE_URL", "https://proxy.example/v1"),
            ("GEMINI_MODEL", "gemini-1.5-pro"),
        ]
        .into_iter()
        .collect();

        let mut config = NodeConfig::default();
        config.apply_env_with(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(
            config.chat.openai_base_url.as_deref(),
            Some("https://proxy.example/v1")
        );
        assert!(config.chat.gemini_base_url.is_none());
        assert_eq!(config.chat.gemini_model.as_deref(), Some("gemini-1.5-pro"));
    }

    #[test]
    fn test_image_model_none_disables_vision() {
        let mut config = NodeConfig::default();
        config.apply_env_with(|k| (k == "IMAGE_MODEL").then(|| "none".to_string()));
        assert!(!config.vision.enabled);
    }

    #[test]
    fn test_rerank_weights_from_toml() {
        let config: NodeConfig =
            toml::from_str("[vision.rerank]\ncolor_bonus = 0.3\n").unwrap();
        assert_eq!(config.vision.rerank.color_bonus, 0.3);
        assert_eq!(config.vision.rerank.histogram_weight, 0.25);
        assert_eq!(config.vision.rerank.prior_window, 40);
        assert!(config.vision.rerank.enabled);
    }

    #[test]
    fn test_rejects_default_above_max() {
        let mut config = NodeConfig::default();
        config.search.default_top_k = 100;
        assert!(config.validate().is_err());
    }
}
