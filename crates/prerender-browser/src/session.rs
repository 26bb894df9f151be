//! Per-render tab session: event subscriptions plus shared settlement state
//!
//! A `TabSession` owns one tab for exactly one render. It couples the tab to
//! a set of named event subscriptions (one dispatcher task per method, so
//! invocations for a single method stay serialized in arrival order) and to
//! the mutable state those dispatchers share with the settlement loop.

use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventRequestWillBeSent, EventResponseReceived, Headers,
};
use chromiumoxide::cdp::browser_protocol::page::EventLoadEventFired;
use chromiumoxide::Page;
use futures::StreamExt;
use parking_lot::Mutex;
use prerender_core::PrerenderError;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::driver::BrowserDriver;
use crate::error::Result;

/// Per-render bookkeeping of subresource requests.
///
/// A request is settled once its id shows up in `finished`, whether it
/// succeeded, failed or was blocked. The quiescence poller only compares
/// counts; a stale read just delays settlement by one tick.
#[derive(Debug, Default)]
pub struct InFlightTable {
    started: Mutex<HashSet<String>>,
    finished: Mutex<HashSet<String>>,
}

impl InFlightTable {
    /// Record a subresource request entering the network queue.
    pub fn start(&self, request_id: &str) {
        self.started.lock().insert(request_id.to_string());
    }

    /// Record a request as settled.
    pub fn finish(&self, request_id: &str) {
        self.finished.lock().insert(request_id.to_string());
    }

    /// (started, finished) sizes at this instant.
    pub fn counts(&self) -> (usize, usize) {
        (self.started.lock().len(), self.finished.lock().len())
    }

    /// True when no started request is still outstanding.
    pub fn settled(&self) -> bool {
        let (started, finished) = self.counts();
        started <= finished
    }
}

/// Main-document fields, written by the responseReceived dispatcher for the
/// navigation's loader-id and by the hard-cap path. Both go through the same
/// mutex.
#[derive(Debug, Default)]
struct MainDocument {
    loader_id: Option<String>,
    status: Option<i64>,
    etag: Option<String>,
    timed_out: bool,
}

/// Mutable settlement state shared between dispatchers and the render loop.
#[derive(Debug)]
pub struct TabState {
    /// Subresource bookkeeping
    pub in_flight: InFlightTable,
    main: Mutex<MainDocument>,
    load_fired: AtomicBool,
    load_notify: Notify,
    last_response_at: Mutex<Instant>,
}

impl TabState {
    fn new() -> Self {
        Self {
            in_flight: InFlightTable::default(),
            main: Mutex::new(MainDocument::default()),
            load_fired: AtomicBool::new(false),
            load_notify: Notify::new(),
            last_response_at: Mutex::new(Instant::now()),
        }
    }

    /// Store the loader-id the browser chose for the main document.
    pub fn set_loader_id(&self, loader_id: String) {
        self.main.lock().loader_id = Some(loader_id);
    }

    /// requestWillBeSent: track subresources; the main document (whose
    /// request-id equals the loader-id) is tracked separately.
    fn record_request(&self, request_id: &str, loader_id: &str, url: &str) {
        if !request_id.is_empty() && request_id != loader_id {
            trace!("request started: {} {}", request_id, url);
            self.in_flight.start(request_id);
        }
    }

    /// responseReceived: refresh the quiet clock; settle subresources; for
    /// the main document capture status and any upstream ETag.
    fn record_response(&self, request_id: &str, loader_id: &str, status: i64, headers: &Headers) {
        *self.last_response_at.lock() = Instant::now();

        if request_id != loader_id {
            self.in_flight.finish(request_id);
            return;
        }

        let mut main = self.main.lock();
        main.status = Some(status);
        if let Some(etag) = header_value(headers, "etag") {
            main.etag = Some(etag);
        }
    }

    /// loadingFailed: blocked URLs and DNS failures settle here too.
    fn record_failure(&self, request_id: &str) {
        self.in_flight.finish(request_id);
    }

    /// Page.loadEventFired: release Phase A.
    fn fire_load(&self) {
        self.load_fired.store(true, Ordering::SeqCst);
        self.load_notify.notify_one();
    }

    /// Whether the browser's own load event has been dispatched.
    pub fn load_has_fired(&self) -> bool {
        self.load_fired.load(Ordering::SeqCst)
    }

    /// Wait until the load event fires. A permit is stored if it already has.
    pub async fn wait_load(&self) {
        if self.load_has_fired() {
            return;
        }
        self.load_notify.notified().await;
    }

    /// Phase B predicate: every started subresource settled and the network
    /// quiet for at least `grace`.
    pub fn network_quiet(&self, grace: Duration) -> bool {
        self.in_flight.settled() && self.last_response_at.lock().elapsed() >= grace
    }

    /// Hard-cap path: force settlement under the same lock the main-document
    /// writer uses. Returns whether the load event had already been
    /// dispatched when the lock was acquired.
    pub fn force_timeout(&self) -> bool {
        let mut main = self.main.lock();
        main.timed_out = true;
        self.load_has_fired()
    }

    /// Snapshot of the main document (status, upstream etag).
    pub fn main_document(&self) -> (Option<i64>, Option<String>) {
        let main = self.main.lock();
        (main.status, main.etag.clone())
    }
}

/// Pull one header out of a CDP header map, case-insensitively.
fn header_value(headers: &Headers, name: &str) -> Option<String> {
    let value = serde_json::to_value(headers).ok()?;
    let object = value.as_object()?;
    object
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.as_str())
        .map(String::from)
}

/// One named subscription: the method it listens for and the dispatcher task
/// consuming that method's event stream.
struct Subscription {
    method: &'static str,
    task: JoinHandle<()>,
}

/// Registry of the session's subscriptions.
#[derive(Default)]
struct SubscriptionSet {
    entries: Mutex<Vec<Subscription>>,
}

impl SubscriptionSet {
    fn register(&self, method: &'static str, task: JoinHandle<()>) {
        self.entries.lock().push(Subscription { method, task });
    }

    /// Remove every handler registered for `method`; returns how many.
    fn remove(&self, method: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|s| {
            if s.method == method {
                s.task.abort();
                false
            } else {
                true
            }
        });
        before - entries.len()
    }

    fn clear(&self) {
        for subscription in self.entries.lock().drain(..) {
            subscription.task.abort();
        }
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Exclusive ownership of one tab for the duration of a render.
pub struct TabSession {
    page: Page,
    state: Arc<TabState>,
    subscriptions: SubscriptionSet,
}

impl TabSession {
    pub const REQUEST_WILL_BE_SENT: &'static str = "Network.requestWillBeSent";
    pub const RESPONSE_RECEIVED: &'static str = "Network.responseReceived";
    pub const LOADING_FAILED: &'static str = "Network.loadingFailed";
    pub const LOAD_EVENT_FIRED: &'static str = "Page.loadEventFired";

    /// Wrap a freshly allocated tab.
    pub fn new(page: Page) -> Self {
        Self {
            page,
            state: Arc::new(TabState::new()),
            subscriptions: SubscriptionSet::default(),
        }
    }

    /// The tab this session owns.
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// The shared settlement state.
    pub fn state(&self) -> &Arc<TabState> {
        &self.state
    }

    fn subscribe_error(method: &str, e: impl std::fmt::Display) -> PrerenderError {
        PrerenderError::BrowserLost(format!("subscribing to {} failed: {}", method, e))
    }

    /// Subscribe the three network events that feed the in-flight table and
    /// the main-document fields.
    pub async fn subscribe_network(&self) -> Result<()> {
        let mut requests = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| Self::subscribe_error(Self::REQUEST_WILL_BE_SENT, e))?;
        let state = Arc::clone(&self.state);
        self.subscriptions.register(
            Self::REQUEST_WILL_BE_SENT,
            tokio::spawn(async move {
                while let Some(event) = requests.next().await {
                    let request_id: &str = event.request_id.as_ref();
                    let loader_id: &str = event.loader_id.as_ref();
                    state.record_request(request_id, loader_id, &event.request.url);
                }
            }),
        );

        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| Self::subscribe_error(Self::RESPONSE_RECEIVED, e))?;
        let state = Arc::clone(&self.state);
        self.subscriptions.register(
            Self::RESPONSE_RECEIVED,
            tokio::spawn(async move {
                while let Some(event) = responses.next().await {
                    let request_id: &str = event.request_id.as_ref();
                    let loader_id: &str = event.loader_id.as_ref();
                    state.record_response(
                        request_id,
                        loader_id,
                        event.response.status,
                        &event.response.headers,
                    );
                }
            }),
        );

        let mut failures = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(|e| Self::subscribe_error(Self::LOADING_FAILED, e))?;
        let state = Arc::clone(&self.state);
        self.subscriptions.register(
            Self::LOADING_FAILED,
            tokio::spawn(async move {
                while let Some(event) = failures.next().await {
                    let request_id: &str = event.request_id.as_ref();
                    state.record_failure(request_id);
                }
            }),
        );

        Ok(())
    }

    /// Subscribe the page load event that releases Phase A.
    pub async fn subscribe_page(&self) -> Result<()> {
        let mut loads = self
            .page
            .event_listener::<EventLoadEventFired>()
            .await
            .map_err(|e| Self::subscribe_error(Self::LOAD_EVENT_FIRED, e))?;
        let state = Arc::clone(&self.state);
        self.subscriptions.register(
            Self::LOAD_EVENT_FIRED,
            tokio::spawn(async move {
                while let Some(_event) = loads.next().await {
                    state.fire_load();
                }
            }),
        );
        Ok(())
    }

    /// Remove all handlers for a method on this tab.
    pub fn unsubscribe(&self, method: &str) {
        let removed = self.subscriptions.remove(method);
        debug!("unsubscribed {} handler(s) for {}", removed, method);
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Tear the session down: all subscriptions go first, so no handler can
    /// run against a destroyed tab, then the tab itself is released.
    pub async fn close(self, driver: &BrowserDriver) {
        self.subscriptions.clear();
        driver.close_tab(self.page).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_counts_and_settlement() {
        let table = InFlightTable::default();
        assert!(table.settled());

        table.start("req-1");
        table.start("req-2");
        assert_eq!(table.counts(), (2, 0));
        assert!(!table.settled());

        table.finish("req-1");
        let (started, finished) = table.counts();
        assert!(started >= finished);
        assert!(!table.settled());

        table.finish("req-2");
        assert_eq!(table.counts(), (2, 2));
        assert!(table.settled());
    }

    #[test]
    fn test_in_flight_finish_is_idempotent() {
        let table = InFlightTable::default();
        table.start("req-1");
        table.finish("req-1");
        table.finish("req-1");
        assert_eq!(table.counts(), (1, 1));
    }

    #[test]
    fn test_main_document_tracked_separately() {
        let state = TabState::new();
        // Main document: request-id equals loader-id.
        state.record_request("loader-1", "loader-1", "http://example.com/");
        assert_eq!(state.in_flight.counts(), (0, 0));

        // Subresource.
        state.record_request("req-2", "loader-1", "http://example.com/app.js");
        assert_eq!(state.in_flight.counts(), (1, 0));

        // Empty request-ids are ignored.
        state.record_request("", "loader-1", "http://example.com/x");
        assert_eq!(state.in_flight.counts(), (1, 0));
    }

    #[test]
    fn test_response_captures_main_status_and_etag() {
        let state = TabState::new();
        let headers = Headers::new(serde_json::json!({ "ETag": "randometag" }));
        state.record_response("loader-1", "loader-1", 200, &headers);

        let (status, etag) = state.main_document();
        assert_eq!(status, Some(200));
        assert_eq!(etag.as_deref(), Some("randometag"));
        // The main document never enters the subresource table.
        assert_eq!(state.in_flight.counts(), (0, 0));
    }

    #[test]
    fn test_subresource_response_settles_without_touching_main() {
        let state = TabState::new();
        state.record_request("req-2", "loader-1", "http://example.com/app.js");
        let headers = Headers::new(serde_json::json!({}));
        state.record_response("req-2", "loader-1", 200, &headers);

        assert!(state.in_flight.settled());
        assert_eq!(state.main_document(), (None, None));
    }

    #[test]
    fn test_failure_settles_request() {
        let state = TabState::new();
        state.record_request("req-2", "loader-1", "http://blocked.example/");
        state.record_failure("req-2");
        assert!(state.in_flight.settled());
    }

    #[test]
    fn test_network_quiet_needs_grace() {
        let state = TabState::new();
        let headers = Headers::new(serde_json::json!({}));
        state.record_response("loader-1", "loader-1", 200, &headers);

        assert!(!state.network_quiet(Duration::from_secs(60)));
        assert!(state.network_quiet(Duration::ZERO));
    }

    #[test]
    fn test_network_quiet_waits_for_outstanding_requests() {
        let state = TabState::new();
        state.record_request("req-1", "loader-1", "http://example.com/app.js");
        assert!(!state.network_quiet(Duration::ZERO));
        state.record_failure("req-1");
        assert!(state.network_quiet(Duration::ZERO));
    }

    #[test]
    fn test_load_flag_and_forced_timeout() {
        let state = TabState::new();
        assert!(!state.load_has_fired());
        assert!(!state.force_timeout());

        state.fire_load();
        assert!(state.load_has_fired());
        // A load dispatched before the timer takes the lock wins the race.
        assert!(state.force_timeout());
    }

    #[tokio::test]
    async fn test_wait_load_returns_after_fire() {
        let state = Arc::new(TabState::new());
        let waiter = Arc::clone(&state);
        let handle = tokio::spawn(async move { waiter.wait_load().await });
        state.fire_load();
        handle.await.expect("waiter completed");
        // A second wait returns immediately.
        state.wait_load().await;
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let headers = Headers::new(serde_json::json!({ "Etag": "abc", "Content-Type": "text/html" }));
        assert_eq!(header_value(&headers, "etag").as_deref(), Some("abc"));
        assert_eq!(header_value(&headers, "ETAG").as_deref(), Some("abc"));
        assert_eq!(header_value(&headers, "x-missing"), None);
    }

    #[tokio::test]
    async fn test_subscription_set_remove_by_method() {
        let set = SubscriptionSet::default();
        set.register("Network.requestWillBeSent", tokio::spawn(async {}));
        set.register("Network.requestWillBeSent", tokio::spawn(async {}));
        set.register("Page.loadEventFired", tokio::spawn(async {}));
        assert_eq!(set.len(), 3);

        assert_eq!(set.remove("Network.requestWillBeSent"), 2);
        assert_eq!(set.len(), 1);
        assert_eq!(set.remove("Network.requestWillBeSent"), 0);

        set.clear();
        assert_eq!(set.len(), 0);
    }
}
