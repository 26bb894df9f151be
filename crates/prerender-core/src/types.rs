//! Shared result types for render and cache paths

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result of rendering one page.
///
/// Invariants maintained by the engine and cache layers:
/// - `html` is non-empty iff `status == 200`
/// - `etag` is non-empty iff `html` is non-empty
/// - `url` is absolute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderResult {
    /// Canonical URL the render was performed against
    pub url: String,
    /// Serialized DOM after settlement, or empty
    pub html: String,
    /// HTTP status attributed to the main document
    pub status: u16,
    /// Upstream ETag of the main document, or a hex md5 of the HTML
    pub etag: String,
    /// Wall time from navigation start to settlement
    pub duration: Duration,
    /// True iff this result was produced by the cache path
    pub cached: bool,
}

impl RenderResult {
    /// An empty result shell for the given URL; filled in by the engine.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: String::new(),
            status: 0,
            etag: String::new(),
            duration: Duration::ZERO,
            cached: false,
        }
    }

    /// A forced-settlement result for a page that hit the hard cap.
    pub fn timed_out(url: impl Into<String>) -> Self {
        Self {
            status: 504,
            ..Self::new(url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_empty() {
        let r = RenderResult::new("http://example.com/");
        assert_eq!(r.status, 0);
        assert!(r.html.is_empty());
        assert!(r.etag.is_empty());
        assert!(!r.cached);
    }

    #[test]
    fn test_timed_out() {
        let r = RenderResult::timed_out("http://example.com/");
        assert_eq!(r.status, 504);
        assert!(r.html.is_empty());
    }

    #[test]
    fn test_roundtrips_through_json() {
        let r = RenderResult {
            url: "http://example.com/".into(),
            html: "<html></html>".into(),
            status: 200,
            etag: "abc".into(),
            duration: Duration::from_millis(1234),
            cached: false,
        };
        let json = serde_json::to_string(&r).unwrap();
        let back: RenderResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.html, r.html);
        assert_eq!(back.status, 200);
        assert_eq!(back.duration, r.duration);
    }
}
