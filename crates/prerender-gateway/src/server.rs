//! Axum front door for the prerender gateway
//!
//! One catch-all route: the target URL is the raw remainder of the request
//! path plus query. Flow per request: normalizer -> cache check (GET only)
//! -> render engine -> cache save -> post-processor -> response. The job is
//! to produce *some* HTTP response for every request within the hard cap.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use prerender_browser::{RenderRequest, Renderer};
use prerender_cache::{CacheLookup, CacheStore};
use prerender_core::{GatewayConfig, PrerenderError, RenderResult, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::normalize::normalize_target;
use crate::postprocess;

/// Shared application state
pub struct AppState {
    pub renderer: Arc<dyn Renderer>,
    pub cache: Option<Arc<dyn CacheStore>>,
    pub config: GatewayConfig,
}

pub type SharedState = Arc<AppState>;

/// Build the gateway router. A fallback handler rather than a path route:
/// the "path" is an arbitrary URL, slashes and all.
pub fn router(state: SharedState) -> Router {
    Router::new().fallback(handle).with_state(state)
}

/// Serve until the shutdown future resolves.
pub async fn serve(
    state: SharedState,
    addr: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state).layer(tower_http::trace::TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn handle(
    State(app): State<SharedState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();

    let raw = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("")
        .trim_start_matches('/');
    if raw.is_empty() {
        return (StatusCode::BAD_REQUEST, "url is required").into_response();
    }

    let url = match normalize_target(raw) {
        Ok(url) => url,
        Err(e) => {
            info!("rejecting target {}: {}", raw, e);
            return (StatusCode::BAD_REQUEST, "Invalid URL").into_response();
        }
    };

    let outcome = fetch(&app, &method, &headers, url.as_str()).await;
    let (response, cached, bytes) = match outcome {
        Ok(result) => {
            let cached = result.cached;
            let (response, bytes) = render_response(&app, result);
            (response, cached, bytes)
        }
        Err(e) => (error_response(e), false, 0),
    };

    info!(
        method = %method,
        path = raw,
        cached = cached,
        status = response.status().as_u16(),
        duration_ms = started.elapsed().as_millis() as u64,
        size = bytes,
        "completed request"
    );
    response
}

/// Cache-then-render. Cache read errors are a miss; save errors are a soft
/// failure. Only status-200 results are worth keeping.
async fn fetch(
    app: &AppState,
    method: &Method,
    headers: &HeaderMap,
    url: &str,
) -> Result<RenderResult> {
    if *method == Method::GET {
        if let Some(ref cache) = app.cache {
            let lookup = CacheLookup::new(url).with_if_none_match(header_string(
                headers,
                axum::http::header::IF_NONE_MATCH,
            ));
            match cache.check(&lookup).await {
                Ok(Some(hit)) => {
                    info!("cache hit for {} (status {})", url, hit.status);
                    return Ok(hit);
                }
                Ok(None) => {}
                Err(e) => warn!("cache read failed, treating as miss: {}", e),
            }
        }
    }

    let user_agent = header_string(headers, axum::http::header::USER_AGENT).unwrap_or_default();
    let request = RenderRequest::new(url, user_agent);
    let result = app.renderer.render(&request).await?;

    if result.status == 200 {
        if let Some(ref cache) = app.cache {
            if let Err(e) = cache.save(&result, app.config.cache_ttl).await {
                warn!("cache save failed: {}", e);
            }
        }
    }

    Ok(result)
}

/// Build the outgoing response plus its body size. Non-200 results carry no
/// body; 200 results run through the post-processor, which may override the
/// status and inject headers. Cached HTML takes the same path: the cache
/// stores the raw render.
fn render_response(app: &AppState, result: RenderResult) -> (Response, usize) {
    if result.status != 200 {
        return (status_only(result.status), 0);
    }

    let processed = postprocess::apply(&result.html, &app.config.render);
    let status = processed
        .status_override
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);

    let mut header_map = HeaderMap::new();
    if !result.etag.is_empty() {
        if let Ok(value) = HeaderValue::try_from(result.etag.as_str()) {
            header_map.insert(axum::http::header::ETAG, value);
        }
    }
    for (name, value) in &processed.headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                header_map.append(name, value);
            }
            _ => warn!("ignoring invalid injected header {}: {}", name, value),
        }
    }

    let bytes = processed.html.len();
    ((status, header_map, processed.html).into_response(), bytes)
}

fn status_only(status: u16) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Body::empty()).into_response()
}

fn error_response(e: PrerenderError) -> Response {
    let status = e.http_status();
    if status == 500 {
        error!("render failed: {}", e);
    }
    status_only(status)
}

fn header_string(headers: &HeaderMap, name: axum::http::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(String::from)
}
