//! Access gate in front of the proxy route.

use std::collections::HashSet;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ProxyError;
use crate::shared::ProxyState;

pub trait AccessPolicy: Send + Sync + 'static {
    fn permits(&self, headers: &HeaderMap) -> bool;
}

/// Lets every caller through.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAccess;

impl AccessPolicy for OpenAccess {
    fn permits(&self, _headers: &HeaderMap) -> bool {
        true
    }
}

/// Requires `Authorization: Bearer <token>` with one of a fixed set of tokens.
#[derive(Debug, Clone)]
pub struct BearerTokens {
    tokens: HashSet<String>,
}

impl BearerTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

impl AccessPolicy for BearerTokens {
    fn permits(&self, headers: &HeaderMap) -> bool {
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|token| self.tokens.contains(token.trim()))
    }
}

/// Middleware rejecting callers the configured policy does not permit.
pub async fn require_access(
    State(state): State<ProxyState>,
    request: Request,
    next: Next,
) -> Result<Response, ProxyError> {
    if !state.access.permits(request.headers()) {
        tracing::debug!(uri = %request.uri(), "proxy access denied");
        return Err(ProxyError::Unauthorized);
    }

    Ok(next.run(request).await)
}
