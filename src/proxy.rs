use std::collections::HashMap;

use anyhow::Context;
use axum::{
    body::{to_bytes, Body},
    extract::{Query, Request, State},
    http::{header, HeaderValue, Uri},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::access::require_access;
use crate::config::Config;
use crate::error::ProxyError;
use crate::fetch::ProxyRequest;
use crate::shared::{logic_proxy, ProxyState};

// Response markers
pub const PROXY_MARKER_HEADER: &str = "x-ifm-proxy";
pub const CONTENT_SOURCE_HEADER: &str = "x-content-source";
pub const PROXY_CACHE_CONTROL: &str = "public, max-age=60";
pub const HEALTH_PATH: &str = "/health";

// Middleware to log all incoming requests
async fn log_requests(uri: Uri, req: Request, next: Next) -> Response {
    tracing::info!(method = %req.method(), uri = %uri, "proxy request");
    next.run(req).await
}

// GET/POST on the proxy path, plus /health outside the access gate
pub fn router(state: ProxyState) -> Router {
    let proxy_path = state.resolver.proxy_path().to_string();

    Router::new()
        .route(
            &proxy_path,
            get(proxy_resource_handler).post(proxy_resource_handler),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_access))
        .route(HEALTH_PATH, get(health_check))
        .with_state(state)
        .layer(middleware::from_fn(log_requests))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

// Bind the listener and serve until Ctrl-C
pub async fn start_proxy_server(config: &Config, state: ProxyState) -> anyhow::Result<()> {
    let port = match config.port {
        Some(port) => port,
        None => portpicker::pick_unused_port().context("failed to find a free port")?,
    };

    let listener = TcpListener::bind((config.bind_host.as_str(), port))
        .await
        .with_context(|| format!("failed to bind {}:{port}", config.bind_host))?;
    let addr = listener.local_addr()?;
    tracing::info!(addr = %addr, proxy_path = %config.proxy_path, "starting ifm proxy");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("ifm proxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// Handler for proxying external resources via <proxy-path>?target=...
async fn proxy_resource_handler(
    State(state): State<ProxyState>,
    Query(params): Query<HashMap<String, String>>,
    req: Request,
) -> Result<Response, ProxyError> {
    let target = params
        .get("target")
        .map(|target| target.trim())
        .filter(|target| !target.is_empty())
        .ok_or(ProxyError::TargetRequired)?
        .to_string();

    let (parts, body) = req.into_parts();
    let limit = state.max_body_bytes;
    let body_bytes = to_bytes(body, limit)
        .await
        .map_err(|_| ProxyError::BodyTooLarge { limit })?;

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request = ProxyRequest {
        target,
        method: parts.method,
        body: (!body_bytes.is_empty()).then_some(body_bytes),
        content_type,
    };
    let method = request.method.clone();

    let proxied = logic_proxy(request, &state).await?;

    tracing::info!(
        source = %proxied.target,
        method = %method,
        status = proxied.status.as_u16(),
        kind = proxied.kind.as_str(),
        bytes = proxied.body.len(),
        "proxied"
    );

    // Targets with non-ASCII characters fall back to their serialized URL.
    let content_source = HeaderValue::from_str(&proxied.target)
        .or_else(|_| HeaderValue::from_str(proxied.source.as_str()))
        .map_err(axum::http::Error::from)?;

    let mut builder = Response::builder()
        .status(proxied.status)
        .header(header::CONTENT_TYPE, proxied.content_type)
        .header(header::CACHE_CONTROL, PROXY_CACHE_CONTROL)
        .header(PROXY_MARKER_HEADER, "1")
        .header(CONTENT_SOURCE_HEADER, content_source);

    if let Some(location) = proxied.location {
        if let Ok(value) = HeaderValue::from_str(&location) {
            builder = builder.header(header::LOCATION, value);
        }
    }

    Ok(builder.body(Body::from(proxied.body))?)
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "ifm-proxy",
        version: env!("CARGO_PKG_VERSION"),
    })
}
