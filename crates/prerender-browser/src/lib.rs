//! Page-settlement engine for the prerender gateway
//!
//! Drives a headless browser through the Chrome DevTools Protocol, tracks
//! in-flight subresource requests from the event stream, and decides when a
//! page is done enough to extract its serialized DOM.
//!
//! # Architecture
//!
//! - [`driver`]: browser lifecycle; owns the CDP transport and the tab pool
//! - [`session`]: per-render bundle of event subscriptions and shared
//!   settlement state attached to one tab
//! - [`engine`]: orchestrates one render — configure, navigate, two-phase
//!   settlement, extraction
//! - [`error`]: error types for browser operations
//!
//! # Example
//!
//! ```no_run
//! use prerender_browser::{BrowserDriver, ChromeRenderer, DriverConfig, RenderRequest, Renderer};
//! use prerender_core::RenderOptions;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = Arc::new(BrowserDriver::launch(DriverConfig::default()).await?);
//!     let renderer = ChromeRenderer::new(Arc::clone(&driver), RenderOptions::default());
//!
//!     let request = RenderRequest::new("https://example.com/", "Googlebot/2.1");
//!     let result = renderer.render(&request).await?;
//!     println!("{} -> {} ({} bytes)", result.url, result.status, result.html.len());
//!
//!     driver.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod driver;
pub mod engine;
pub mod error;
pub mod session;

// Re-export commonly used types
pub use driver::{BrowserDriver, DriverConfig};
pub use engine::{ChromeRenderer, RenderRequest, Renderer};
pub use error::{PrerenderError, Result};
pub use session::{InFlightTable, TabSession, TabState};
