//! Mercury shopping agent node.
//!
//! Serves text and image search plus chat-style recommendations over a
//! static product catalog.
//!
//! - [`catalog`]: product model, loading, directory scan, image fallbacks
//! - [`search`]: encoders, cosine index, filters and the search engine
//! - [`agent`]: intent router, chat handler, hosted models, URL unwrapping
//! - [`api`]: axum HTTP server

pub mod agent;
pub mod api;
pub mod catalog;
pub mod config;
pub mod error;
pub mod search;

pub use agent::{
    ChatHandler, ChatModel, ImageFetcher, Intent, IntentRouter, Mode, RouteRequest, RouteResponse,
};
pub use api::{ApiConfig, ApiServer, AppState};
pub use catalog::{Catalog, Category, ImageFallbackChain, Product};
pub use config::NodeConfig;
pub use error::{Error, Result};
pub use search::{
    EmbeddingService, EmbeddingServiceConfig, HashingTextEncoder, ImageEncoder, ImageModelKind,
    SearchEngine, SearchFilters, SearchHit, TextEncoder,
};
