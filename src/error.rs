//! Error types for the proxy route.
//!
//! Every failure is reported to the caller as a small JSON document:
//!
//! ```json
//! {"error": "proxy_failed", "detail": "upstream timed out: ..."}
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::fetch::FetchError;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// No `target` query parameter, or an empty one.
    #[error("target parameter is required")]
    TargetRequired,

    /// The target is not an absolute `http`/`https` URL.
    #[error("invalid scheme: {0}")]
    InvalidScheme(String),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("unauthorized")]
    Unauthorized,

    /// The upstream could not be reached or did not answer in time.
    #[error(transparent)]
    Upstream(FetchError),

    /// The upstream answer could not be turned into a response.
    #[error("invalid upstream response: {0}")]
    InvalidResponse(#[from] axum::http::Error),
}

impl From<FetchError> for ProxyError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidScheme(detail) => Self::InvalidScheme(detail),
            other => Self::Upstream(other),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ProxyError {
    /// Machine-readable code put in the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TargetRequired => "target_required",
            Self::InvalidScheme(_) => "invalid_scheme",
            Self::BodyTooLarge { .. } => "body_too_large",
            Self::Unauthorized => "unauthorized",
            Self::Upstream(_) | Self::InvalidResponse(_) => "proxy_failed",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::TargetRequired | Self::InvalidScheme(_) => StatusCode::BAD_REQUEST,
            Self::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Upstream(_) | Self::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn detail(&self) -> Option<String> {
        match self {
            Self::TargetRequired | Self::Unauthorized => None,
            Self::Upstream(err) => Some(error_chain(err)),
            other => Some(other.to_string()),
        }
    }
}

/// `err` followed by its sources, so the caller sees the underlying cause.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, code = self.code(), "proxy request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "proxy request rejected");
        }

        let body = ErrorBody {
            error: self.code(),
            detail: self.detail(),
        };
        (status, Json(body)).into_response()
    }
}
