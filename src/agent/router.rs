//! Intent router: decide whether a request is an image query or a chat message.

use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::chat::ChatHandler;
use super::fetch::ImageFetcher;
use super::parser::Intent;
use super::unwrap::{is_http_url, unwrap_image_url};
use crate::error::{Error, Result};
use crate::search::{SearchEngine, SearchFilters, SearchHit};

/// Reply when image search is switched off.
pub const VISION_DISABLED: &str = "Image search is disabled on this server";

/// Which handler produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Image search ran (upload or URL)
    ImageSearch,
    /// Chat message classified as a shopping request; text search ran
    Recommend,
    /// Hosted chat model answered
    Chat,
    /// Offline reply
    Local,
    /// A provider failed; `reply` explains
    Error,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::ImageSearch => "image_search",
            Mode::Recommend => "recommend",
            Mode::Chat => "chat",
            Mode::Local => "local",
            Mode::Error => "error",
        }
    }
}

/// One user interaction.
#[derive(Debug, Clone, Default)]
pub struct RouteRequest {
    pub message: Option<String>,
    pub uploaded_image: Option<Vec<u8>>,
    pub image_url: Option<String>,
    pub top_k: Option<usize>,
}

/// Response envelope shared by every mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    pub items: Vec<SearchHit>,
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<SearchFilters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

impl RouteResponse {
    /// Failure envelope: explanatory reply, no items.
    pub fn error(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            items: Vec::new(),
            mode: Mode::Error,
            intent: None,
            filters: None,
            backend: None,
        }
    }

    fn image(reply: impl Into<String>, items: Vec<SearchHit>) -> Self {
        Self {
            reply: Some(reply.into()),
            items,
            mode: Mode::ImageSearch,
            intent: None,
            filters: None,
            backend: None,
        }
    }
}

/// Where the query image comes from.
enum ImageSource {
    Upload(Vec<u8>),
    Url(String),
}

/// Dispatches requests to image search or the chat handler.
pub struct IntentRouter {
    engine: Arc<SearchEngine>,
    chat: Arc<ChatHandler>,
    fetcher: ImageFetcher,
}

impl IntentRouter {
    pub fn new(engine: Arc<SearchEngine>, chat: Arc<ChatHandler>, fetcher: ImageFetcher) -> Self {
        Self {
            engine,
            chat,
            fetcher,
        }
    }

    /// The chat handler used for text messages.
    pub fn chat(&self) -> &Arc<ChatHandler> {
        &self.chat
    }

    /// Route one request.
    ///
    /// An uploaded image wins over an image URL, which wins over the message.
    /// A message that is just an `http(s)` URL counts as an image URL.
    ///
    /// # Errors
    ///
    /// `EmptyRequest` when nothing usable was sent and `InvalidRequest` for a
    /// zero `top_k`. Provider failures never error; they produce a
    /// `Mode::Error` envelope (or a local reply for chat).
    pub async fn route(&self, request: RouteRequest) -> Result<RouteResponse> {
        let request_id = Uuid::new_v4();
        let span = info_span!("route", request_id = %request_id);
        async move {
            if request.top_k == Some(0) {
                return Err(Error::InvalidRequest("k must be greater than 0".to_string()));
            }
            let response = self.dispatch(request).await?;
            counter!("mercury_requests_total", "mode" => response.mode.as_str()).increment(1);
            info!("Routed request as {}", response.mode.as_str());
            Ok(response)
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, request: RouteRequest) -> Result<RouteResponse> {
        let message = request
            .message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty());

        let source = match request.uploaded_image {
            Some(bytes) if !bytes.is_empty() => Some(ImageSource::Upload(bytes)),
            _ => request
                .image_url
                .as_deref()
                .map(str::trim)
                .filter(|u| is_http_url(u))
                .or_else(|| message.filter(|m| is_http_url(m)))
                .map(|u| ImageSource::Url(u.to_string())),
        };

        if let Some(source) = source {
            return Ok(self.image_search(source, request.top_k).await);
        }
        if let Some(message) = message {
            return Ok(match self.chat.respond(message, request.top_k).await {
                Ok(response) => response,
                Err(e) if e.is_client_error() => return Err(e),
                Err(e) => {
                    warn!("Chat handling failed: {}", e);
                    RouteResponse::error(format!("Sorry, I couldn't complete that request: {}", e))
                }
            });
        }
        Err(Error::EmptyRequest)
    }

    async fn image_search(&self, source: ImageSource, top_k: Option<usize>) -> RouteResponse {
        if !self.engine.vision_enabled() {
            return RouteResponse::image(VISION_DISABLED, Vec::new());
        }
        if self.engine.catalog().is_empty() {
            return RouteResponse::error("The catalog is empty, nothing to compare against.");
        }
        let k = match self.engine.resolve_k(top_k) {
            Ok(k) => k,
            Err(e) => return RouteResponse::error(e.to_string()),
        };

        let bytes = match source {
            ImageSource::Upload(bytes) => bytes,
            ImageSource::Url(url) => {
                let resolved = unwrap_image_url(&url);
                if resolved != url {
                    info!("Unwrapped image URL to {}", resolved);
                }
                match self.fetcher.fetch(&resolved).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Image fetch failed: {}", e);
                        counter!("mercury_provider_failures_total", "provider" => "image_fetch")
                            .increment(1);
                        return RouteResponse::error(format!(
                            "Sorry, I couldn't download that image: {}",
                            e
                        ));
                    }
                }
            }
        };

        match self.engine.search_image_bytes(bytes, k).await {
            Ok(items) if items.is_empty() => {
                RouteResponse::image("I couldn't find visually similar items.", items)
            }
            Ok(items) => RouteResponse::image("Here are visually similar items:", items),
            Err(e) => {
                warn!("Image search failed: {}", e);
                counter!("mercury_provider_failures_total", "provider" => "image_encoder")
                    .increment(1);
                RouteResponse::error(format!("Sorry, I couldn't process that image: {}", e))
            }
        }
    }
}
