//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::error::Error;

/// Error returned by handlers: 400 for caller mistakes, 500 otherwise.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError(Error::InvalidRequest(msg.into()))
    }

    pub fn status(&self) -> StatusCode {
        if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        ApiError::bad_request(format!("malformed multipart body: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError(Error::EmptyRequest).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::bad_request("k").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError(Error::Embedding("onnx".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_response_status() {
        let response = ApiError(Error::EmptyRequest).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
