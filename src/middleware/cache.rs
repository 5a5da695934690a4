//! Result caching with a pluggable store

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::{Middleware, Next, RequestInfo};
use crate::error::Result;
use crate::server::HandlerContext;

/// Where cached results live
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live entry
    async fn get(&self, key: &str) -> Option<Value>;

    /// Store an entry for `ttl`
    async fn set(&self, key: &str, value: Value, ttl: Duration);
}

/// In-process store. Expired entries are evicted when next read.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, (Value, Instant)>,
}

impl MemoryCacheStore {
    /// An empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.1 > Instant::now() => return Some(entry.0.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, (_, expires)| *expires <= Instant::now());
        }
        None
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.entries.insert(key.to_string(), (value, Instant::now() + ttl));
    }
}

type KeyFn = Arc<dyn Fn(&RequestInfo) -> Option<String> + Send + Sync>;

/// Serves repeated calls from a cache.
///
/// The key function decides what is cacheable: returning `None` bypasses the
/// cache for that call. Only successful results are stored.
#[derive(Clone)]
pub struct CacheMiddleware {
    key: KeyFn,
    ttl: Duration,
    store: Arc<dyn CacheStore>,
}

impl CacheMiddleware {
    /// Cache with an in-memory store
    pub fn new<F>(ttl: Duration, key: F) -> Self
    where
        F: Fn(&RequestInfo) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            key: Arc::new(key),
            ttl,
            store: Arc::new(MemoryCacheStore::new()),
        }
    }

    /// Key on kind, name and input: every distinct call is cached separately
    pub fn by_input(ttl: Duration) -> Self {
        Self::new(ttl, |info| Some(format!("{}:{}:{}", info.kind, info.name, info.input)))
    }

    /// Use a different store
    pub fn with_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = store;
        self
    }
}

impl fmt::Debug for CacheMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheMiddleware").field("ttl", &self.ttl).finish()
    }
}

#[async_trait]
impl Middleware for CacheMiddleware {
    async fn handle(&self, ctx: &HandlerContext, info: &RequestInfo, next: Next) -> Result<Value> {
        let Some(key) = (self.key)(info) else {
            return next.run(ctx).await;
        };

        if let Some(hit) = self.store.get(&key).await {
            debug!(kind = %info.kind, name = %info.name, "cache hit");
            return Ok(hit);
        }

        let value = next.run(ctx).await?;
        self.store.set(&key, value.clone(), self.ttl).await;
        Ok(value)
    }
}
