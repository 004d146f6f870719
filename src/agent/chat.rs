//! Chat handler: classify a message, search when shopping, and reply.
//!
//! At most one hosted chat call is made per message. Without a hosted
//! model, or when it fails or is rate limited, replies are produced locally.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use metrics::counter;
use tracing::{debug, warn};

use super::llm::ChatModel;
use super::parser::{parse_message, Intent};
use super::router::{Mode, RouteResponse};
use crate::config::ChatSection;
use crate::error::{Error, Result};
use crate::search::{SearchEngine, SearchHit};

/// Persona given to hosted models.
pub const SYSTEM_PROMPT: &str = "You are Mercury, a friendly shopping agent. \
Capabilities: general chat, text recommendations from catalog, image-based product matching. \
Be concise and helpful; if the user expresses a shopping intent, present a short list of product picks.";

/// Reply when a message asks for photo search without sending one.
pub const IMAGE_HINT: &str =
    "Paste an image URL or upload a photo and I'll find similar items from the catalog.";

/// Reply when a recommendation finds nothing.
pub const NO_MATCHES: &str =
    "I didn't find matching items. Try a different color, category or price range.";

/// Items listed in a local recommendation summary.
const SUMMARY_ITEMS: usize = 6;

/// Items described to a hosted model.
const CONTEXT_ITEMS: usize = 8;

/// Backend label for locally generated replies.
pub const LOCAL_BACKEND: &str = "local";

/// Offline answer for general conversation.
pub fn local_smalltalk(message: &str) -> &'static str {
    let m = message.trim().to_lowercase();
    let words: Vec<&str> = m
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    if m.contains("name") {
        return "I'm Mercury. I can recommend products from the catalog and find similar items from a photo or image URL.";
    }
    if m.contains("what can you do") || m.contains("capabilities") || words.contains(&"help") {
        return "I can: 1) chat, 2) recommend items from our catalog from a text request, 3) find similar items from a photo or image URL.";
    }
    if words.iter().any(|w| matches!(*w, "hi" | "hello" | "hey")) {
        return "Hi! Tell me what you're shopping for (e.g., \"breathable running tee under $30\").";
    }
    "Try a shopping request like \"lightweight running tee under $30\" or paste an image URL."
}

/// Offline bullet summary of recommended items.
pub fn local_summary(items: &[SearchHit]) -> String {
    if items.is_empty() {
        return NO_MATCHES.to_string();
    }
    let lines: Vec<String> = items
        .iter()
        .take(SUMMARY_ITEMS)
        .map(|hit| {
            let p = &hit.product;
            format!(
                "• {} - ${:.2} - solid {} {} pick",
                p.title,
                p.price,
                p.color.as_deref().unwrap_or("assorted"),
                p.category.singular()
            )
        })
        .collect();
    format!("Here are some picks:\n{}", lines.join("\n"))
}

fn recommendation_prompt(message: &str, items: &[SearchHit]) -> String {
    let context: Vec<String> = items
        .iter()
        .take(CONTEXT_ITEMS)
        .map(|hit| {
            let p = &hit.product;
            format!(
                "- {} • {} • {} • ${:.2}",
                p.title,
                p.brand,
                p.color.as_deref().unwrap_or(""),
                p.price
            )
        })
        .collect();
    format!(
        "User request: {}\n\nCatalog matches:\n{}\n\nSummarize the best picks for the user in a few short bullets. Only mention items listed above.",
        message,
        context.join("\n")
    )
}

/// Handles free-text chat messages.
pub struct ChatHandler {
    engine: Arc<SearchEngine>,
    model: Option<Arc<dyn ChatModel>>,
    limiter: Option<DefaultDirectRateLimiter>,
    recommend_top_k: usize,
}

impl ChatHandler {
    pub fn new(
        engine: Arc<SearchEngine>,
        model: Option<Arc<dyn ChatModel>>,
        config: &ChatSection,
    ) -> Self {
        let limiter = NonZeroU32::new(config.requests_per_minute)
            .map(|rpm| RateLimiter::direct(Quota::per_minute(rpm)));
        Self {
            engine,
            model,
            limiter,
            recommend_top_k: config.recommend_top_k,
        }
    }

    /// Backend label of the hosted model, or `local`.
    pub fn backend(&self) -> &str {
        self.model
            .as_deref()
            .map(|m| m.backend())
            .unwrap_or(LOCAL_BACKEND)
    }

    /// Ask the hosted model, if one is configured and within quota.
    ///
    /// Returns the reply and the backend that produced it, or `None` when
    /// the caller should answer locally.
    async fn ask_hosted(&self, user: &str) -> Option<(String, String)> {
        let model = self.model.as_ref()?;
        if let Some(limiter) = &self.limiter {
            if limiter.check().is_err() {
                warn!("Hosted chat rate limit reached, answering locally");
                return None;
            }
        }
        match model.complete(SYSTEM_PROMPT, user).await {
            Ok(reply) => Some((reply, model.backend().to_string())),
            Err(e) => {
                warn!("Hosted chat via {} failed: {}", model.backend(), e);
                counter!("mercury_provider_failures_total", "provider" => model.backend().to_string())
                    .increment(1);
                None
            }
        }
    }

    /// Respond to one message.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for a zero `top_k`; search failures are propagated.
    pub async fn respond(&self, message: &str, top_k: Option<usize>) -> Result<RouteResponse> {
        let message = message.trim();
        let parsed = parse_message(message);
        debug!("Classified message as {:?} with {:?}", parsed.intent, parsed.filters);

        match parsed.intent {
            Intent::Recommend => {
                if self.engine.catalog().is_empty() {
                    return Err(Error::Catalog("the catalog is empty".to_string()));
                }
                let k = self
                    .engine
                    .resolve_k(Some(top_k.unwrap_or(self.recommend_top_k)))?;
                let items = self
                    .engine
                    .search_text(message, &parsed.filters, k)
                    .await?;

                let hosted = if items.is_empty() {
                    None
                } else {
                    self.ask_hosted(&recommendation_prompt(message, &items)).await
                };
                let (reply, backend) =
                    hosted.unwrap_or_else(|| (local_summary(&items), LOCAL_BACKEND.to_string()));

                Ok(RouteResponse {
                    reply: Some(reply),
                    items,
                    mode: Mode::Recommend,
                    intent: Some(Intent::Recommend),
                    filters: Some(parsed.filters),
                    backend: Some(backend),
                })
            }
            Intent::ImageSearch => Ok(RouteResponse {
                reply: Some(IMAGE_HINT.to_string()),
                items: Vec::new(),
                mode: Mode::Local,
                intent: Some(Intent::ImageSearch),
                filters: Some(parsed.filters),
                backend: Some(LOCAL_BACKEND.to_string()),
            }),
            Intent::Chat => {
                let (reply, mode, backend) = match self.ask_hosted(message).await {
                    Some((reply, backend)) => (reply, Mode::Chat, backend),
                    None => (
                        local_smalltalk(message).to_string(),
                        Mode::Local,
                        LOCAL_BACKEND.to_string(),
                    ),
                };
                Ok(RouteResponse {
                    reply: Some(reply),
                    items: Vec::new(),
                    mode,
                    intent: Some(Intent::Chat),
                    filters: Some(parsed.filters),
                    backend: Some(backend),
                })
            }
        }
    }
}
