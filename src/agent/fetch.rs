//! Remote image download with a deadline and a size cap.

use std::time::Duration;

use reqwest::redirect;
use tracing::debug;

use crate::config::VisionSection;
use crate::error::{Error, Result};

/// Redirect hops followed before a fetch is abandoned.
pub const MAX_REDIRECTS: usize = 3;

/// Follow at most [`MAX_REDIRECTS`] hops, and only to http(s) URLs.
fn redirect_policy() -> redirect::Policy {
    redirect::Policy::custom(|attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if !matches!(attempt.url().scheme(), "http" | "https") {
            attempt.error("redirect to a non-http URL")
        } else {
            attempt.follow()
        }
    })
}

/// Downloads query images referenced by URL.
#[derive(Debug, Clone)]
pub struct ImageFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
}

impl ImageFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(redirect_policy())
            .user_agent(concat!("mercury-node/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            timeout,
            max_bytes,
        })
    }

    pub fn from_config(vision: &VisionSection) -> Result<Self> {
        Self::new(
            Duration::from_secs(vision.fetch_timeout_secs),
            vision.max_image_bytes,
        )
    }

    fn map_err(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                operation: "image fetch".to_string(),
                duration_ms: self.timeout.as_millis() as u64,
            }
        } else {
            Error::Fetch(err.without_url().to_string())
        }
    }

    /// Download `url`, failing on non-2xx status or bodies over the size cap.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Fetching image {}", url);
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_err(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("{} returned HTTP {}", url, status)));
        }
        if let Some(len) = response.content_length() {
            if len as usize > self.max_bytes {
                return Err(Error::Fetch(format!(
                    "image is {} bytes, limit is {}",
                    len, self.max_bytes
                )));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.map_err(e))? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(Error::Fetch(format!(
                    "image exceeds limit of {} bytes",
                    self.max_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }
        if body.is_empty() {
            return Err(Error::Fetch(format!("{} returned an empty body", url)));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve(status: u16, body: Vec<u8>, delay: Duration) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img.png"))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_bytes(body)
                    .set_delay(delay),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_fetches_body() {
        let server = serve(200, vec![1, 2, 3], Duration::ZERO).await;
        let fetcher = ImageFetcher::new(Duration::from_secs(5), 1024).unwrap();
        let bytes = fetcher
            .fetch(&format!("{}/img.png", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_non_success_status_fails() {
        let server = serve(404, b"missing".to_vec(), Duration::ZERO).await;
        let fetcher = ImageFetcher::new(Duration::from_secs(5), 1024).unwrap();
        let err = fetcher
            .fetch(&format!("{}/img.png", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_oversized_body_fails() {
        let server = serve(200, vec![0u8; 2048], Duration::ZERO).await;
        let fetcher = ImageFetcher::new(Duration::from_secs(5), 1024).unwrap();
        let err = fetcher
            .fetch(&format!("{}/img.png", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = serve(200, vec![1], Duration::from_millis(500)).await;
        let fetcher = ImageFetcher::new(Duration::from_millis(100), 1024).unwrap();
        let err = fetcher
            .fetch(&format!("{}/img.png", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "got {err:?}");
    }

    async fn redirect_to(server: &MockServer, from: &str, to: &str) {
        Mock::given(method("GET"))
            .and(path(from))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}{}", server.uri(), to)),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_follows_short_redirect_chain() {
        let server = serve(200, vec![7, 7], Duration::ZERO).await;
        redirect_to(&server, "/a", "/b").await;
        redirect_to(&server, "/b", "/img.png").await;
        let fetcher = ImageFetcher::new(Duration::from_secs(5), 1024).unwrap();
        let bytes = fetcher
            .fetch(&format!("{}/a", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, vec![7, 7]);
    }

    #[tokio::test]
    async fn test_redirect_loop_is_abandoned() {
        let server = MockServer::start().await;
        redirect_to(&server, "/loop", "/loop").await;
        let fetcher = ImageFetcher::new(Duration::from_secs(5), 1024).unwrap();
        let err = fetcher
            .fetch(&format!("{}/loop", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch(_)), "got {err:?}");
        assert_eq!(
            server.received_requests().await.unwrap().len(),
            MAX_REDIRECTS + 1
        );
    }
}
