//! Route handlers.

use axum::extract::{Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, warn};

use super::error::ApiError;
use super::types::{
    CatalogResponse, ChatRequest, ChatResponse, HealthResponse, RecommendRequest,
    RecommendResponse, ResultsResponse, SearchByUrlRequest, SearchTextRequest,
};
use super::AppState;
use crate::agent::{is_http_url, unwrap_image_url, RouteRequest, RouteResponse};
use crate::search::{SearchFilters, SearchHit};

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Log a provider failure and fall back to no results.
fn or_empty(result: crate::Result<Vec<SearchHit>>, what: &str) -> Vec<SearchHit> {
    result.unwrap_or_else(|e| {
        warn!("{} failed: {}", what, e);
        Vec::new()
    })
}

/// `POST /api/chat`
pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let response = state
        .router
        .route(RouteRequest {
            message: Some(body.message),
            top_k: body.top_k,
            ..Default::default()
        })
        .await?;
    let reply = response.reply.unwrap_or_default();
    Ok(Json(ChatResponse {
        text: reply.clone(),
        reply,
        items: response.items,
        mode: response.mode,
        intent: response.intent,
        filters: response.filters,
        backend: response.backend,
    }))
}

/// `POST /api/recommend`
pub async fn recommend(
    State(state): State<AppState>,
    Json(body): Json<RecommendRequest>,
) -> ApiResult<Json<RecommendResponse>> {
    let k = state.engine.resolve_k(body.top_k)?;
    let items = or_empty(
        state
            .engine
            .search_text(&body.query, &SearchFilters::default(), k)
            .await,
        "Recommendation",
    );
    Ok(Json(RecommendResponse {
        results: items.clone(),
        items,
    }))
}

/// `POST /api/search_text`
pub async fn search_text(
    State(state): State<AppState>,
    Json(body): Json<SearchTextRequest>,
) -> ApiResult<Json<ResultsResponse>> {
    let k = state.engine.resolve_k(body.k)?;
    let filters = body.filters.unwrap_or_default();
    let results = or_empty(
        state.engine.search_text(&body.q, &filters, k).await,
        "Text search",
    );
    Ok(Json(ResultsResponse { results }))
}

/// Fields of an agent multipart form.
#[derive(Debug, Default)]
struct AgentForm {
    message: Option<String>,
    image: Option<Vec<u8>>,
    image_url: Option<String>,
    k: Option<usize>,
}

async fn read_form(mut multipart: Multipart) -> ApiResult<AgentForm> {
    let mut form = AgentForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" | "file" => {
                let bytes = field.bytes().await?;
                if !bytes.is_empty() {
                    form.image = Some(bytes.to_vec());
                }
            }
            "image_url" | "url" => form.image_url = Some(field.text().await?),
            "message" | "q" => form.message = Some(field.text().await?),
            "k" | "top_k" => {
                let raw = field.text().await?;
                let raw = raw.trim();
                if !raw.is_empty() {
                    let k = raw
                        .parse()
                        .map_err(|_| ApiError::bad_request(format!("k must be an integer, got '{}'", raw)))?;
                    form.k = Some(k);
                }
            }
            other => debug!("Ignoring multipart field '{}'", other),
        }
    }
    Ok(form)
}

/// `POST /api/image-search` and `POST /api/agent`: the general dispatcher.
pub async fn agent(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<RouteResponse>> {
    let form = read_form(multipart).await?;
    let response = state
        .router
        .route(RouteRequest {
            message: form.message,
            uploaded_image: form.image,
            image_url: form.image_url,
            top_k: form.k,
        })
        .await?;
    Ok(Json(response))
}

/// `POST /api/search_image`
pub async fn search_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<ResultsResponse>> {
    let form = read_form(multipart).await?;
    let bytes = form
        .image
        .ok_or_else(|| ApiError::bad_request("missing 'file' field"))?;
    let k = state.engine.resolve_k(form.k)?;
    let results = or_empty(
        state.engine.search_image_bytes(bytes, k).await,
        "Image search",
    );
    Ok(Json(ResultsResponse { results }))
}

/// `POST /api/search_by_url`
pub async fn search_by_url(
    State(state): State<AppState>,
    Json(body): Json<SearchByUrlRequest>,
) -> ApiResult<Json<ResultsResponse>> {
    if !is_http_url(&body.url) {
        return Err(ApiError::bad_request("url must be an absolute http(s) URL"));
    }
    let k = state.engine.resolve_k(body.k)?;
    if !state.engine.vision_enabled() {
        return Ok(Json(ResultsResponse {
            results: Vec::new(),
        }));
    }
    let url = unwrap_image_url(body.url.trim());
    let results = match state.fetcher.fetch(&url).await {
        Ok(bytes) => or_empty(
            state.engine.search_image_bytes(bytes, k).await,
            "Image search",
        ),
        Err(e) => {
            warn!("Image fetch failed: {}", e);
            Vec::new()
        }
    };
    Ok(Json(ResultsResponse { results }))
}

/// `GET /api/catalog`
pub async fn catalog(State(state): State<AppState>) -> Json<CatalogResponse> {
    Json(CatalogResponse {
        items: state.engine.catalog_items(),
    })
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        item_count: state.engine.catalog().len(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime: state.start_time.elapsed().as_secs(),
        chat_backend: state.router.chat().backend().to_string(),
        text_encoder: state.engine.text_encoder_name().to_string(),
        image_encoder: state.engine.image_encoder_name().map(str::to_string),
    })
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
