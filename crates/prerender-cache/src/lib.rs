//! # prerender-cache
//!
//! Best-effort cache in front of the render engine. The contract is small:
//! `check` may return a previously rendered result (or a synthetic 304 when
//! the caller's `If-None-Match` matches the stored validator), `save` stores
//! a result under its canonical URL with a TTL. Backend failures are the
//! caller's problem only to log: a read error is a miss, a write error is a
//! soft failure.

mod memory;
mod redis;

pub use crate::redis::RedisCache;
pub use memory::MemoryCache;

use async_trait::async_trait;
use prerender_core::{CacheBackend, RenderResult, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A cache read: canonical URL plus the caller's validator, if any.
#[derive(Debug, Clone)]
pub struct CacheLookup {
    /// Canonical URL (after normalization)
    pub url: String,
    /// `If-None-Match` header of the incoming request
    pub if_none_match: Option<String>,
}

impl CacheLookup {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            if_none_match: None,
        }
    }

    pub fn with_if_none_match(mut self, etag: Option<String>) -> Self {
        self.if_none_match = etag;
        self
    }
}

/// Contract for saving and retrieving rendered results.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns a hit iff an unexpired entry exists for the canonical URL.
    /// A matching `If-None-Match` yields a synthetic 304 with empty HTML.
    async fn check(&self, lookup: &CacheLookup) -> Result<Option<RenderResult>>;

    /// Stores html + ETag under the canonical URL with the given TTL.
    async fn save(&self, result: &RenderResult, ttl: Duration) -> Result<()>;
}

/// Synthetic not-modified hit for a matching validator.
pub(crate) fn not_modified(url: &str) -> RenderResult {
    RenderResult {
        url: url.to_string(),
        html: String::new(),
        status: 304,
        etag: String::new(),
        duration: Duration::ZERO,
        cached: true,
    }
}

/// Build the configured cache backend, if any.
///
/// The object-store backend is deployment plumbing and not compiled in;
/// selecting it leaves the gateway uncached with a warning.
pub fn from_config(backend: &CacheBackend) -> Result<Option<Arc<dyn CacheStore>>> {
    match backend {
        CacheBackend::None => Ok(None),
        CacheBackend::Memory => Ok(Some(Arc::new(MemoryCache::new()))),
        CacheBackend::Redis { url } => Ok(Some(Arc::new(RedisCache::new(url)?))),
        CacheBackend::S3 => {
            warn!("object-store cache backend is not compiled in; running uncached");
            Ok(None)
        }
    }
}
