//! Browser error types - re-exports the unified PrerenderError from prerender-core
//!
//! All browser errors use the unified PrerenderError type:
//! - DriverUnavailable(String) - the browser cannot be allocated a tab
//! - BrowserLost(String) - the browser connection died mid-render
//! - Extraction(String) - DOM retrieval failed after a successful load
//!
//! Error messages should be descriptive and include context about the operation that failed.

pub use prerender_core::{PrerenderError, Result};
