//! Unified error types for the prerender gateway

use thiserror::Error;

/// Unified error type for all gateway operations
#[derive(Error, Debug)]
pub enum PrerenderError {
    // Input errors (surfaced as 400)
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    // Browser errors (surfaced as 500)
    #[error("browser unavailable: {0}")]
    DriverUnavailable(String),

    #[error("browser connection lost: {0}")]
    BrowserLost(String),

    // Hard cap (surfaced as 504)
    #[error("timed out waiting for page load")]
    PageLoadTimeout,

    // DOM retrieval after a successful load (surfaced as 500)
    #[error("extraction failed: {0}")]
    Extraction(String),

    // Cache backend failures (never surfaced; logged and treated as miss)
    #[error("cache error: {0}")]
    Cache(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl PrerenderError {
    /// HTTP status the front door maps this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            PrerenderError::InvalidUrl(_) => 400,
            PrerenderError::PageLoadTimeout => 504,
            _ => 500,
        }
    }
}

/// Result type alias using PrerenderError
pub type Result<T> = std::result::Result<T, PrerenderError>;
