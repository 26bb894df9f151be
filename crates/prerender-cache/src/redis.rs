//! Redis cache backend
//!
//! Key layout: the canonical URL is the key, `html` and `Etag` are hash
//! fields, and the TTL sits on the key itself (PEXPIRE). An `If-None-Match`
//! that matches the stored validator is answered without pulling the HTML.

use crate::{not_modified, CacheLookup, CacheStore};
use ::redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use async_trait::async_trait;
use prerender_core::{PrerenderError, RenderResult, Result};
use std::collections::HashMap;
use std::time::Duration;

/// Cache backed by a Redis server.
pub struct RedisCache {
    client: Client,
}

impl RedisCache {
    /// Connect lazily to the given DSN (`redis://host:port/db`).
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| PrerenderError::Cache(format!("invalid redis url: {}", e)))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| PrerenderError::Cache(format!("redis connection failed: {}", e)))
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn check(&self, lookup: &CacheLookup) -> Result<Option<RenderResult>> {
        let mut conn = self.connection().await?;

        if let Some(ref etag) = lookup.if_none_match {
            let stored: Option<String> = conn
                .hget(&lookup.url, "Etag")
                .await
                .map_err(|e| PrerenderError::Cache(format!("getting cached etag failed: {}", e)))?;
            if stored.as_deref() == Some(etag.as_str()) {
                return Ok(Some(not_modified(&lookup.url)));
            }
        }

        let data: HashMap<String, String> = conn
            .hgetall(&lookup.url)
            .await
            .map_err(|e| PrerenderError::Cache(format!("getting cached data failed: {}", e)))?;
        let Some(html) = data.get("html") else {
            return Ok(None);
        };

        Ok(Some(RenderResult {
            url: lookup.url.clone(),
            html: html.clone(),
            status: 200,
            etag: data.get("Etag").cloned().unwrap_or_default(),
            duration: Duration::ZERO,
            cached: true,
        }))
    }

    async fn save(&self, result: &RenderResult, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        ::redis::pipe()
            .atomic()
            .hset(&result.url, "Etag", &result.etag)
            .ignore()
            .hset(&result.url, "html", &result.html)
            .ignore()
            .pexpire(&result.url, ttl.as_millis() as i64)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| PrerenderError::Cache(format!("saving cached data failed: {}", e)))
    }
}
