//! Request and response bodies.

use serde::{Deserialize, Serialize};

use crate::agent::{Intent, Mode};
use crate::search::{SearchFilters, SearchHit};

/// `POST /api/chat`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChatRequest {
    pub message: String,
    pub user_id: Option<String>,
    #[serde(alias = "k")]
    pub top_k: Option<usize>,
}

/// `POST /api/chat` response.
///
/// `text` mirrors `reply` for older clients.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub text: String,
    pub items: Vec<SearchHit>,
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<SearchFilters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

/// `POST /api/recommend`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecommendRequest {
    #[serde(alias = "q")]
    pub query: String,
    pub user_id: Option<String>,
    #[serde(alias = "k")]
    pub top_k: Option<usize>,
}

/// `POST /api/recommend` response; `results` mirrors `items`.
#[derive(Debug, Clone, Serialize)]
pub struct RecommendResponse {
    pub items: Vec<SearchHit>,
    pub results: Vec<SearchHit>,
}

/// `POST /api/search_text`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchTextRequest {
    #[serde(alias = "query")]
    pub q: String,
    #[serde(alias = "top_k")]
    pub k: Option<usize>,
    pub filters: Option<SearchFilters>,
}

/// `POST /api/search_by_url`
#[derive(Debug, Clone, Deserialize)]
pub struct SearchByUrlRequest {
    pub url: String,
    #[serde(default, alias = "top_k")]
    pub k: Option<usize>,
}

/// Ranked results.
#[derive(Debug, Clone, Serialize)]
pub struct ResultsResponse {
    pub results: Vec<SearchHit>,
}

/// `GET /api/catalog`
#[derive(Debug, Clone, Serialize)]
pub struct CatalogResponse {
    pub items: Vec<SearchHit>,
}

/// `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub item_count: usize,
    pub version: String,
    /// Seconds since start
    pub uptime: u64,
    pub chat_backend: String,
    pub text_encoder: String,
    pub image_encoder: Option<String>,
}
