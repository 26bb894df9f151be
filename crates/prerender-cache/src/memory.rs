//! In-process TTL cache
//!
//! Keeps rendered HTML and its validator in a plain map with lazy
//! expiration. Suitable for single-instance deployments and as the cache
//! double in tests.

use crate::{not_modified, CacheLookup, CacheStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use prerender_core::{RenderResult, Result};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    html: String,
    etag: String,
    expires_at: Instant,
}

impl Entry {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// In-memory cache keyed by canonical URL.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (possibly expired, not yet reaped) entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn check(&self, lookup: &CacheLookup) -> Result<Option<RenderResult>> {
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get(&lookup.url) else {
            return Ok(None);
        };
        if !entry.is_fresh() {
            entries.remove(&lookup.url);
            return Ok(None);
        }

        if let Some(ref etag) = lookup.if_none_match {
            if *etag == entry.etag {
                return Ok(Some(not_modified(&lookup.url)));
            }
        }

        Ok(Some(RenderResult {
            url: lookup.url.clone(),
            html: entry.html.clone(),
            status: 200,
            etag: entry.etag.clone(),
            duration: Duration::ZERO,
            cached: true,
        }))
    }

    async fn save(&self, result: &RenderResult, ttl: Duration) -> Result<()> {
        self.entries.lock().insert(
            result.url.clone(),
            Entry {
                html: result.html.clone(),
                etag: result.etag.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(url: &str) -> RenderResult {
        RenderResult {
            url: url.into(),
            html: "<html><head></head><body>data</body></html>".into(),
            status: 200,
            etag: "2d52742649958b6126ae9a9789c61c7e".into(),
            duration: Duration::from_millis(42),
            cached: false,
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let cache = MemoryCache::new();
        let saved = rendered("http://example.com/");
        cache
            .save(&saved, Duration::from_secs(60))
            .await
            .expect("save");

        let hit = cache
            .check(&CacheLookup::new("http://example.com/"))
            .await
            .expect("check")
            .expect("hit");
        assert_eq!(hit.html, saved.html);
        assert_eq!(hit.etag, saved.etag);
        assert_eq!(hit.status, 200);
        assert!(hit.cached);
    }

    #[tokio::test]
    async fn test_miss_on_unknown_url() {
        let cache = MemoryCache::new();
        let miss = cache
            .check(&CacheLookup::new("http://example.com/missing"))
            .await
            .expect("check");
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = MemoryCache::new();
        cache
            .save(&rendered("http://example.com/"), Duration::from_millis(10))
            .await
            .expect("save");

        tokio::time::sleep(Duration::from_millis(30)).await;

        let miss = cache
            .check(&CacheLookup::new("http://example.com/"))
            .await
            .expect("check");
        assert!(miss.is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_matching_if_none_match_yields_304() {
        let cache = MemoryCache::new();
        let saved = rendered("http://example.com/");
        cache
            .save(&saved, Duration::from_secs(60))
            .await
            .expect("save");

        let lookup =
            CacheLookup::new("http://example.com/").with_if_none_match(Some(saved.etag.clone()));
        let hit = cache.check(&lookup).await.expect("check").expect("hit");
        assert_eq!(hit.status, 304);
        assert!(hit.html.is_empty());
        assert!(hit.cached);
    }

    #[tokio::test]
    async fn test_stale_if_none_match_returns_full_hit() {
        let cache = MemoryCache::new();
        cache
            .save(&rendered("http://example.com/"), Duration::from_secs(60))
            .await
            .expect("save");

        let lookup =
            CacheLookup::new("http://example.com/").with_if_none_match(Some("other".into()));
        let hit = cache.check(&lookup).await.expect("check").expect("hit");
        assert_eq!(hit.status, 200);
        assert!(!hit.html.is_empty());
    }
}
