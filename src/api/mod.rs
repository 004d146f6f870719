//! HTTP API for the Mercury node.
//!
//! | Method | Path                  | Purpose                                  |
//! |--------|-----------------------|------------------------------------------|
//! | POST   | `/api/chat`           | Chat message through the intent router   |
//! | POST   | `/api/recommend`      | Text recommendations                     |
//! | POST   | `/api/search_text`    | Text search with filters                 |
//! | POST   | `/api/image-search`   | Multipart dispatcher (image, URL, text)  |
//! | POST   | `/api/agent`          | Same as `/api/image-search`              |
//! | POST   | `/api/search_image`   | Multipart image upload search            |
//! | POST   | `/api/search_by_url`  | Image search by URL                      |
//! | GET    | `/api/catalog`        | Every product                            |
//! | GET    | `/health`             | Liveness and component summary           |
//! | GET    | `/metrics`            | Prometheus exposition                    |
//! | GET    | `/data/*`             | Static product images                    |

pub mod error;
pub mod handlers;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::agent::{ImageFetcher, IntentRouter};
use crate::config::ApiSection;
use crate::error::Result;
use crate::search::SearchEngine;

pub use error::ApiError;

/// Server settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Address to bind, e.g. `0.0.0.0:8000`
    pub listen_address: String,
    /// Enable CORS
    pub cors_enabled: bool,
    /// Allowed origins; `*` allows any
    pub cors_origins: Vec<String>,
    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig::from(&ApiSection::default())
    }
}

impl From<&ApiSection> for ApiConfig {
    fn from(section: &ApiSection) -> Self {
        Self {
            listen_address: section.listen_address.clone(),
            cors_enabled: section.cors_enabled,
            cors_origins: section.cors_origins.clone(),
            max_body_bytes: section.max_body_bytes,
        }
    }
}

/// Shared handler state. Every component is immutable or internally synchronized.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SearchEngine>,
    pub router: Arc<IntentRouter>,
    pub fetcher: ImageFetcher,
    /// Served under `/data`
    pub data_dir: PathBuf,
    pub start_time: Instant,
    /// Installed Prometheus recorder, rendered at `/metrics`
    pub metrics: Option<PrometheusHandle>,
}

/// The HTTP server.
pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
}

impl ApiServer {
    pub fn with_state(config: ApiConfig, state: AppState) -> Self {
        Self { config, state }
    }

    fn cors_layer(&self) -> CorsLayer {
        let origins = &self.config.cors_origins;
        if origins.iter().any(|o| o == "*") {
            return CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
        }
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match o.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin '{}'", o);
                    None
                }
            })
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(parsed))
            .allow_methods(Any)
            .allow_headers(Any)
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        let api = Router::new()
            .route("/api/chat", post(handlers::chat))
            .route("/api/recommend", post(handlers::recommend))
            .route("/api/search_text", post(handlers::search_text))
            .route("/api/image-search", post(handlers::agent))
            .route("/api/agent", post(handlers::agent))
            .route("/api/search_image", post(handlers::search_image))
            .route("/api/search_by_url", post(handlers::search_by_url))
            .route("/api/catalog", get(handlers::catalog))
            .route("/health", get(handlers::health))
            .route("/metrics", get(handlers::metrics))
            .nest_service("/data", ServeDir::new(&self.state.data_dir))
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone());

        if self.config.cors_enabled {
            api.layer(self.cors_layer())
        } else {
            api
        }
    }

    /// Bind and serve until the process stops.
    pub async fn run(self, addr: &str) -> Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server listening on {}", listener.local_addr()?);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ChatHandler;
    use crate::config::ChatSection;
    use crate::search::engine::tests::text_engine;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn server(config: ApiConfig) -> ApiServer {
        let engine = Arc::new(text_engine().await);
        let chat = Arc::new(ChatHandler::new(engine.clone(), None, &ChatSection::default()));
        let fetcher = ImageFetcher::new(Duration::from_secs(1), 1024).unwrap();
        let router = Arc::new(IntentRouter::new(engine.clone(), chat, fetcher.clone()));
        let state = AppState {
            engine,
            router,
            fetcher,
            data_dir: PathBuf::from("data"),
            start_time: Instant::now(),
            metrics: None,
        };
        ApiServer::with_state(config, state)
    }

    #[tokio::test]
    async fn test_health_route() {
        let app = server(ApiConfig::default()).await.router();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cors_allows_configured_origin() {
        let config = ApiConfig {
            cors_origins: vec!["http://localhost:5173".to_string()],
            ..Default::default()
        };
        let app = server(config).await.router();
        let response = app
            .oneshot(
                Request::get("/health")
                    .header("origin", "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("http://localhost:5173")
        );
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = server(ApiConfig::default()).await.router();
        let response = app
            .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
