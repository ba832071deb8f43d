use std::sync::Arc;

use bytes::Bytes;
use reqwest::StatusCode;
use url::Url;

use crate::access::{AccessPolicy, BearerTokens, OpenAccess};
use crate::config::Config;
use crate::css::rewrite_css;
use crate::fetch::{decode_text, ContentKind, FetchError, FetchResult, Fetcher, ProxyRequest};
use crate::html::rewrite_html;
use crate::resolve::{Resolver, RewriteContext};

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
pub const CSS_CONTENT_TYPE: &str = "text/css; charset=utf-8";

// Shared state for the proxy route: outbound client, URL resolver and access gate.
// Nothing in here is mutated after startup.
#[derive(Clone)]
pub struct ProxyState {
    pub fetcher: Fetcher,
    pub resolver: Resolver,
    pub access: Arc<dyn AccessPolicy>,
    pub max_body_bytes: usize,
}

impl ProxyState {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;
        let fetcher = Fetcher::new(config.timeout, config.user_agent.clone())?;
        let access: Arc<dyn AccessPolicy> = if config.api_tokens.is_empty() {
            Arc::new(OpenAccess)
        } else {
            Arc::new(BearerTokens::new(config.api_tokens.iter().cloned()))
        };

        Ok(Self {
            fetcher,
            resolver: Resolver::new(config.proxy_path.clone()),
            access,
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Replace the access policy, for embedding in an application with its own auth.
    pub fn with_access(mut self, access: impl AccessPolicy) -> Self {
        self.access = Arc::new(access);
        self
    }
}

/// A fetched resource, rewritten and ready to be sent back to the browser.
#[derive(Debug, Clone)]
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub kind: ContentKind,
    pub content_type: String,
    /// Rewritten `Location` of an upstream redirect.
    pub location: Option<String>,
    /// The validated target URL.
    pub source: Url,
    /// The target as requested, reported in the source marker header.
    pub target: String,
    pub body: Bytes,
}

// --- Core Logic Functions (Axum Agnostic) ---

pub async fn logic_proxy(
    request: ProxyRequest,
    state: &ProxyState,
) -> Result<ProxiedResponse, FetchError> {
    let fetched = state.fetcher.fetch(request).await?;
    Ok(assemble(fetched, &state.resolver))
}

/// Rewrite HTML and CSS bodies, pass everything else through untouched.
pub fn assemble(fetched: FetchResult, resolver: &Resolver) -> ProxiedResponse {
    let FetchResult {
        url,
        target,
        status,
        content_type,
        location,
        body,
    } = fetched;

    let ctx = RewriteContext::new(&url, resolver).with_target(&target);
    let kind = ContentKind::from_content_type(&content_type);
    let location = location.map(|location| ctx.resolve(&location));

    let (content_type, body) = match kind {
        ContentKind::Html => {
            let text = decode_text(&body, &content_type);
            let rewritten = rewrite_html(&text, &ctx);
            (HTML_CONTENT_TYPE.to_string(), Bytes::from(rewritten))
        }
        ContentKind::Css => {
            let text = decode_text(&body, &content_type);
            let rewritten = rewrite_css(&text, &ctx);
            (CSS_CONTENT_TYPE.to_string(), Bytes::from(rewritten))
        }
        ContentKind::Other => (content_type, body),
    };

    ProxiedResponse {
        status,
        kind,
        content_type,
        location,
        source: url,
        target,
        body,
    }
}
