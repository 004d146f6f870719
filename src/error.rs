//! Error types for the Mercury node.

use thiserror::Error;

/// Node-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog failed to load or validate
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Embedding model failed to initialise or encode
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Hosted provider (chat model, remote service) failed
    #[error("Provider '{provider}' failed: {reason}")]
    Provider { provider: String, reason: String },

    /// Outbound operation exceeded its deadline
    #[error("Operation '{operation}' timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Bytes could not be decoded as an image
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Remote resource could not be fetched
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Request carried no message, image or image URL
    #[error("Empty request: provide a message, an image or an image URL")]
    EmptyRequest,

    /// Request was structurally invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// HTTP API error
    #[error("API error: {0}")]
    Api(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML decode error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build a provider failure from any displayable reason.
    pub fn provider(provider: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Provider {
            provider: provider.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error is the caller's fault rather than a provider's.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::EmptyRequest | Error::InvalidRequest(_))
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type for node operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_classified() {
        assert!(Error::EmptyRequest.is_client_error());
        assert!(Error::InvalidRequest("k must be > 0".into()).is_client_error());
        assert!(!Error::Fetch("dns".into()).is_client_error());
        assert!(!Error::provider("openai", "503").is_client_error());
    }

    #[test]
    fn test_provider_error_message() {
        let err = Error::provider("gemini", "quota exceeded");
        assert_eq!(
            err.to_string(),
            "Provider 'gemini' failed: quota exceeded"
        );
    }
}
