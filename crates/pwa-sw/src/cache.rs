//! Cache stores and the cache storage capability.
//!
//! A [`CacheStorage`] holds named [`Cache`] stores. The worker agent only
//! talks to the trait, so tests and the demo can swap the backing store.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hashbrown::HashMap;
use pwa_net::{Method, Request, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::trace;

use crate::{Result, ServiceWorkerError};

// ==================== Entries ====================

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request key (URL without fragment).
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Build an entry from a completed network exchange.
    pub fn from_response(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: request.key(),
            method: request.method.as_str().to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            cached_at: now_millis(),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Response produced by the fetch handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Status code.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Whether from cache.
    pub from_cache: bool,
}

impl FetchResponse {
    /// Create a response from cache entry.
    pub fn from_cache(entry: &CacheEntry) -> Self {
        Self {
            status: entry.status,
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            from_cache: true,
        }
    }
}

// ==================== Cache ====================

/// A single named cache store.
#[derive(Debug, Default, Clone)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request. Only `GET` requests can match.
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        if request.method != Method::GET {
            return None;
        }
        self.entries.get(&request.key())
    }

    /// Add or replace an entry under its URL.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.url.clone(), entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, url: &str) -> bool {
        self.entries.remove(url).is_some()
    }

    /// All keys (URLs), sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// Cache storage capability (the `caches` global).
///
/// The namespace is shared by every worker instance of an origin, so all
/// operations must tolerate concurrent callers.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache, creating it if missing.
    async fn open(&self, name: &str) -> Result<()>;

    /// Store a batch of entries in an existing cache. All or nothing.
    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<()>;

    /// First match across all caches, searched in creation order.
    async fn match_request(&self, request: &Request) -> Result<Option<CacheEntry>>;

    /// Whether a cache exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Names of all caches in creation order.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Request keys stored in one cache, sorted.
    async fn entry_keys(&self, name: &str) -> Result<Vec<String>>;

    /// Delete a cache. Deleting a missing cache returns `Ok(false)`.
    async fn delete(&self, name: &str) -> Result<bool>;
}

#[derive(Debug, Default)]
struct StorageInner {
    caches: HashMap<String, Cache>,
    order: Vec<String>,
}

/// In-process cache storage.
#[derive(Debug, Default, Clone)]
pub struct MemoryCacheStorage {
    inner: Arc<RwLock<StorageInner>>,
}

impl MemoryCacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of one cache, for inspection.
    pub async fn snapshot(&self, name: &str) -> Option<Cache> {
        self.inner.read().await.caches.get(name).cloned()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.caches.contains_key(name) {
            trace!(cache = name, "Creating cache");
            inner.caches.insert(name.to_string(), Cache::new(name));
            inner.order.push(name.to_string());
        }
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let cache = inner
            .caches
            .get_mut(name)
            .ok_or_else(|| ServiceWorkerError::CacheError(format!("cache {name:?} is not open")))?;

        for entry in entries {
            cache.put(entry);
        }
        Ok(())
    }

    async fn match_request(&self, request: &Request) -> Result<Option<CacheEntry>> {
        let inner = self.inner.read().await;
        let hit = inner
            .order
            .iter()
            .filter_map(|name| inner.caches.get(name))
            .find_map(|cache| cache.match_request(request))
            .cloned();
        Ok(hit)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.inner.read().await.caches.contains_key(name))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().await.order.clone())
    }

    async fn entry_keys(&self, name: &str) -> Result<Vec<String>> {
        self.inner
            .read()
            .await
            .caches
            .get(name)
            .map(Cache::keys)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("cache {name:?}")))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let removed = inner.caches.remove(name).is_some();
        inner.order.retain(|n| n != name);
        Ok(removed)
    }
}
