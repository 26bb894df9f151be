//! Browser lifecycle management using Chrome DevTools Protocol
//!
//! One long-lived headless Chromium per gateway process. The driver owns the
//! CDP connection, allocates and releases tabs, and keeps the transport event
//! loop running on its own task so no handler can block frame delivery.

use crate::error::Result;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use prerender_core::PrerenderError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upper bound on waiting for the browser to acknowledge a tab close.
const TAB_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for browser launch
#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    /// Path to the Chrome/Chromium binary; autodetected when absent
    pub chrome_path: Option<PathBuf>,
}

/// Owns the headless browser process and its CDP transport.
pub struct BrowserDriver {
    /// Underlying browser instance; `close` needs exclusive access
    browser: Mutex<Browser>,
    /// Task pumping the CDP transport; finished means the connection is gone
    handler_task: JoinHandle<()>,
}

impl BrowserDriver {
    /// Launch a headless browser ready to allocate tabs.
    pub async fn launch(config: DriverConfig) -> Result<Self> {
        info!("launching headless browser");

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--hide-scrollbars");
        if let Some(ref path) = config.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let browser_config = builder
            .build()
            .map_err(PrerenderError::DriverUnavailable)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| PrerenderError::DriverUnavailable(format!("launch failed: {}", e)))?;

        // Pump the transport until the connection drops. Frames that fail to
        // deserialize surface here as errors and are dropped without taking
        // any tab down with them.
        let handler_task = tokio::spawn(async move {
            while let Some(message) = handler.next().await {
                if let Err(e) = message {
                    debug!("browser transport error: {}", e);
                }
            }
            warn!("browser connection closed");
        });

        info!("browser launched");

        Ok(Self {
            browser: Mutex::new(browser),
            handler_task,
        })
    }

    /// Launch with an optional binary path.
    pub async fn launch_at(chrome_path: Option<&Path>) -> Result<Self> {
        Self::launch(DriverConfig {
            chrome_path: chrome_path.map(Path::to_path_buf),
        })
        .await
    }

    /// Whether the CDP connection is still up.
    pub fn is_alive(&self) -> bool {
        !self.handler_task.is_finished()
    }

    /// Allocate a fresh tab.
    pub async fn new_tab(&self) -> Result<Page> {
        if !self.is_alive() {
            return Err(PrerenderError::DriverUnavailable(
                "browser process is gone".to_string(),
            ));
        }

        let browser = self.browser.lock().await;
        browser
            .new_page("about:blank")
            .await
            .map_err(|e| PrerenderError::DriverUnavailable(format!("creating tab failed: {}", e)))
    }

    /// Release a tab. Idempotent and bounded: a browser that stopped
    /// answering does not get to hold the caller hostage.
    pub async fn close_tab(&self, page: Page) {
        match tokio::time::timeout(TAB_CLOSE_TIMEOUT, page.close()).await {
            Ok(Ok(())) => debug!("tab closed"),
            Ok(Err(e)) => debug!("closing tab failed: {}", e),
            Err(_) => warn!("closing tab timed out after {:?}", TAB_CLOSE_TIMEOUT),
        }
    }

    /// Kill the browser process. Idempotent; outstanding renders observe
    /// lost-connection errors on their next command.
    pub async fn shutdown(&self) {
        info!("shutting down browser");
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            debug!("browser close returned: {}", e);
        }
        if let Err(e) = browser.wait().await {
            debug!("browser wait returned: {}", e);
        }
        self.handler_task.abort();
    }
}
