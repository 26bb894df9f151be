//! Render engine: drives one page load to settlement and extracts the DOM
//!
//! A page in a script-heavy app is never formally "finished", so settlement
//! is two-phased: Phase A waits for the browser's own `load` event, Phase B
//! waits for the network to go quiet (no outstanding subresources, nothing
//! received for a grace period). Phase B only starts counting once Phase A
//! has released, otherwise an empty page would settle at t=0. A hard cap
//! bounds the whole render; hitting it is a normal outcome (504), not a
//! transport error.

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, Headers, SetBlockedUrLsParams, SetExtraHttpHeadersParams,
    SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EnableParams as PageEnableParams, NavigateParams, StopLoadingParams,
};
use chromiumoxide::Page;
use prerender_core::{PrerenderError, RenderOptions, RenderResult};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::driver::BrowserDriver;
use crate::error::Result;
use crate::session::{TabSession, TabState};

/// One render request: the canonical URL plus the caller's user agent.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Absolute URL to render
    pub url: String,
    /// User agent of the crawler hitting the gateway; the gateway suffix is
    /// appended before the override is installed
    pub user_agent: String,
}

impl RenderRequest {
    pub fn new(url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// Implemented by renderers capable of fetching a webpage and returning the
/// HTML after client-side scripts have run.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<RenderResult>;
}

/// Renderer backed by one headless Chromium; safe to invoke concurrently,
/// each call takes its own fresh tab.
pub struct ChromeRenderer {
    driver: Arc<BrowserDriver>,
    options: RenderOptions,
}

impl ChromeRenderer {
    pub fn new(driver: Arc<BrowserDriver>, options: RenderOptions) -> Self {
        Self { driver, options }
    }

    /// The driver this renderer allocates tabs from.
    pub fn driver(&self) -> &Arc<BrowserDriver> {
        &self.driver
    }

    /// Deterministic pre-navigation setup: enable the DOM, Page and Network
    /// domains (unbounded buffers), install the blocked-URL list, tag
    /// outgoing requests, and override the user agent.
    async fn configure(&self, page: &Page, request: &RenderRequest) -> Result<()> {
        page.execute(PageEnableParams::default())
            .await
            .map_err(|e| self.browser_error(format!("enabling page events failed: {}", e)))?;
        page.execute(dom::EnableParams::default())
            .await
            .map_err(|e| self.browser_error(format!("enabling dom events failed: {}", e)))?;
        page.execute(
            NetworkEnableParams::builder()
                .max_total_buffer_size(-1)
                .max_resource_buffer_size(-1)
                .build(),
        )
        .await
        .map_err(|e| self.browser_error(format!("enabling network events failed: {}", e)))?;

        let blocked = SetBlockedUrLsParams::builder()
            .urls(self.options.blocked_url_patterns.clone())
            .build()
            .map_err(PrerenderError::Other)?;
        page.execute(blocked)
            .await
            .map_err(|e| self.browser_error(format!("installing blocked urls failed: {}", e)))?;

        let extra_headers = SetExtraHttpHeadersParams::builder()
            .headers(Headers::new(serde_json::json!({ "X-Prerender": "1" })))
            .build()
            .map_err(PrerenderError::Other)?;
        page.execute(extra_headers)
            .await
            .map_err(|e| self.browser_error(format!("setting extra headers failed: {}", e)))?;

        let user_agent = compose_user_agent(&request.user_agent, &self.options.user_agent_suffix);
        let override_ua = SetUserAgentOverrideParams::builder()
            .user_agent(user_agent)
            .build()
            .map_err(PrerenderError::Other)?;
        page.execute(override_ua)
            .await
            .map_err(|e| self.browser_error(format!("overriding user agent failed: {}", e)))?;

        Ok(())
    }

    async fn drive(&self, session: &TabSession, request: &RenderRequest) -> Result<RenderResult> {
        let page = session.page();
        let state = session.state();
        let mut result = RenderResult::new(&request.url);

        self.configure(page, request).await?;

        // Subscriptions go in before Navigate so no event can slip past.
        session.subscribe_network().await?;
        session.subscribe_page().await?;

        // The hard cap and the reported duration both run from navigation
        // start.
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.options.page_load_timeout;

        let navigate = NavigateParams::builder()
            .url(request.url.clone())
            .build()
            .map_err(PrerenderError::Other)?;
        let navigation = page.execute(navigate).await.map_err(|e| {
            self.browser_error(format!("navigating to {} failed: {}", request.url, e))
        })?;
        if let Some(loader_id) = navigation.loader_id.as_ref() {
            let loader_id: &str = loader_id.as_ref();
            state.set_loader_id(loader_id.to_string());
        }

        // Phase A, then Phase B; either one running out the clock forces
        // settlement with a gateway timeout.
        if !self.await_load(state, deadline).await {
            let mut result = self.force_timeout(session, result).await;
            result.duration = start.elapsed();
            return Ok(result);
        }
        if !self.await_quiescence(state, deadline).await {
            let mut result = self.force_timeout(session, result).await;
            result.duration = start.elapsed();
            return Ok(result);
        }

        let (status, etag) = state.main_document();
        result.status = match status {
            // Load fired but the main document never produced a response:
            // DNS failures that short-circuit the network stack land here.
            None => 404,
            // Conditional semantics belong to the cache layer end to end.
            Some(304) => 200,
            Some(code) => u16::try_from(code).unwrap_or(500),
        };

        if result.status == 200 {
            result.html = self.extract_html(page).await?;
            result.etag = match etag {
                Some(upstream) => upstream,
                None => content_etag(&result.html),
            };
        }

        result.duration = start.elapsed();
        Ok(result)
    }

    /// Phase A: wait for the browser's load event, bounded by the hard cap.
    /// On expiry the load handler still wins if it was dispatched before the
    /// result lock is taken.
    async fn await_load(&self, state: &TabState, deadline: tokio::time::Instant) -> bool {
        match tokio::time::timeout_at(deadline, state.wait_load()).await {
            Ok(()) => true,
            Err(_) => state.load_has_fired(),
        }
    }

    /// Phase B: tick until every started subresource has settled and the
    /// network has been quiet for the grace period. Stale counts only delay
    /// settlement by one tick.
    async fn await_quiescence(&self, state: &TabState, deadline: tokio::time::Instant) -> bool {
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        loop {
            if state.network_quiet(self.options.quiescence_grace) {
                return true;
            }
            if tokio::time::timeout_at(deadline, ticker.tick()).await.is_err() {
                // Hard cap elapsed; the predicate gets one last look.
                return state.network_quiet(self.options.quiescence_grace);
            }
        }
    }

    /// Hard-cap path: stop the load and force settlement. A stuck page is a
    /// normal outcome, not an exception.
    async fn force_timeout(&self, session: &TabSession, result: RenderResult) -> RenderResult {
        let load_had_fired = session.state().force_timeout();
        debug!(
            "hard cap reached for {} (load fired: {})",
            result.url, load_had_fired
        );
        if let Err(e) = session.page().execute(StopLoadingParams::default()).await {
            debug!("stopping load after hard cap failed: {}", e);
        }
        RenderResult::timed_out(result.url)
    }

    /// Fetch the document root and serialize it.
    async fn extract_html(&self, page: &Page) -> Result<String> {
        let document = page
            .execute(dom::GetDocumentParams::builder().depth(1).pierce(false).build())
            .await
            .map_err(|e| self.extraction_error(format!("getting document failed: {}", e)))?;

        let outer = page
            .execute(
                dom::GetOuterHtmlParams::builder()
                    .node_id(document.root.node_id.clone())
                    .build(),
            )
            .await
            .map_err(|e| self.extraction_error(format!("getting outer html failed: {}", e)))?;

        Ok(outer.outer_html.clone())
    }

    fn browser_error(&self, message: String) -> PrerenderError {
        if self.driver.is_alive() {
            PrerenderError::Other(message)
        } else {
            PrerenderError::BrowserLost(message)
        }
    }

    fn extraction_error(&self, message: String) -> PrerenderError {
        if self.driver.is_alive() {
            PrerenderError::Extraction(message)
        } else {
            PrerenderError::BrowserLost(message)
        }
    }
}

#[async_trait]
impl Renderer for ChromeRenderer {
    /// Perform exactly one page load in exactly one fresh tab. Returns when
    /// the page settles, the hard cap elapses, or an unrecoverable error
    /// occurs; the tab is released on every path.
    async fn render(&self, request: &RenderRequest) -> Result<RenderResult> {
        let page = self.driver.new_tab().await?;
        let session = TabSession::new(page);

        let outcome = self.drive(&session, request).await;
        session.close(&self.driver).await;

        let result = outcome?;
        info!(
            "rendered {} status={} duration={:?}",
            result.url, result.status, result.duration
        );
        Ok(result)
    }
}

/// `<client UA> <gateway suffix>`, tolerating an absent client UA.
fn compose_user_agent(client: &str, suffix: &str) -> String {
    if client.is_empty() {
        suffix.to_string()
    } else if suffix.is_empty() {
        client.to_string()
    } else {
        format!("{} {}", client, suffix)
    }
}

/// Stable 128-bit content fingerprint used when the upstream sent no ETag.
fn content_etag(html: &str) -> String {
    format!("{:x}", md5::compute(html.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_user_agent() {
        assert_eq!(
            compose_user_agent("Googlebot/2.1", "Prerender (+https://example.com)"),
            "Googlebot/2.1 Prerender (+https://example.com)"
        );
        assert_eq!(
            compose_user_agent("", "Prerender (+https://example.com)"),
            "Prerender (+https://example.com)"
        );
        assert_eq!(compose_user_agent("Googlebot/2.1", ""), "Googlebot/2.1");
    }

    #[test]
    fn test_content_etag_matches_known_vector() {
        assert_eq!(
            content_etag("<html><head></head><body>data</body></html>"),
            "2d52742649958b6126ae9a9789c61c7e"
        );
    }

    #[test]
    fn test_content_etag_is_stable() {
        let a = content_etag("<html></html>");
        let b = content_etag("<html></html>");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_render_request_carries_caller_user_agent() {
        let request = RenderRequest::new("http://example.com/", "Googlebot/2.1");
        assert_eq!(request.url, "http://example.com/");
        assert_eq!(request.user_agent, "Googlebot/2.1");
    }
}
