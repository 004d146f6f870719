//! Hosted chat model clients (OpenAI, Gemini).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::config::ChatSection;
use crate::error::{Error, Result};

/// Default OpenAI API base.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
/// Default OpenAI model.
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";
/// Default Gemini API base.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Default Gemini model.
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// A hosted chat completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Backend label reported to clients (`openai`, `gemini`)
    fn backend(&self) -> &str;

    /// One completion for a system prompt and a user message.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Pick the hosted model from configured keys: OpenAI first, then Gemini.
///
/// Returns `Ok(None)` when no key is configured.
pub fn from_config(chat: &ChatSection) -> Result<Option<Arc<dyn ChatModel>>> {
    let timeout = Duration::from_secs(chat.timeout_secs);
    if let Some(key) = &chat.openai_api_key {
        let model = OpenAiChat::new(
            key,
            chat.openai_model.clone(),
            chat.openai_base_url.clone(),
            timeout,
        )?;
        info!("Hosted chat: OpenAI ({})", model.model);
        return Ok(Some(Arc::new(model)));
    }
    if let Some(key) = &chat.google_api_key {
        let model = GeminiChat::new(
            key,
            chat.gemini_model.clone(),
            chat.gemini_base_url.clone(),
            timeout,
        )?;
        info!("Hosted chat: Gemini ({})", model.model);
        return Ok(Some(Arc::new(model)));
    }
    info!("No hosted chat key configured, replies are generated locally");
    Ok(None)
}

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))
}

/// Map a transport error, keeping timeouts distinct. The URL is stripped from
/// the message so request details never reach the logs.
fn transport_error(provider: &str, timeout: Duration, err: reqwest::Error) -> Error {
    let err = err.without_url();
    if err.is_timeout() {
        Error::Timeout {
            operation: format!("{} completion", provider),
            duration_ms: timeout.as_millis() as u64,
        }
    } else {
        Error::provider(provider, err)
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(
    provider: &str,
    timeout: Duration,
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        return Err(Error::provider(provider, format!("HTTP {}: {}", status, snippet)));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| transport_error(provider, timeout, e))
}

/// OpenAI chat completions.
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiReply,
}

#[derive(Deserialize)]
struct OpenAiReply {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChat {
    pub fn new(
        api_key: impl Into<String>,
        model: Option<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key: api_key.into(),
            model: model.unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string()),
            base_url: base_url
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn backend(&self) -> &str {
        "openai"
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": 0.5,
            "messages": [
                OpenAiMessage { role: "system", content: system },
                OpenAiMessage { role: "user", content: user },
            ],
        });
        debug!("OpenAI request to {} ({})", self.base_url, self.model);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("openai", self.timeout, e))?;

        let parsed: OpenAiResponse = read_json("openai", self.timeout, response).await?;
        parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| Error::provider("openai", "response had no content"))
    }
}

/// Google Gemini `generateContent`.
pub struct GeminiChat {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiChat {
    pub fn new(
        api_key: impl Into<String>,
        model: Option<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key: api_key.into(),
            model: model.unwrap_or_else(|| GEMINI_DEFAULT_MODEL.to_string()),
            base_url: base_url
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl ChatModel for GeminiChat {
    fn backend(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": user }] }],
            "generationConfig": { "temperature": 0.7 },
        });
        debug!("Gemini request ({})", self.model);
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("gemini", self.timeout, e))?;

        let parsed: GeminiResponse = read_json("gemini", self.timeout, response).await?;
        let text = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::provider("gemini", "response had no text"));
        }
        Ok(text.to_string())
    }
}
