//! Bounded LRU cache of raw asset bytes, and the loader that fills it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info};
use sounity_core::{Error, Result};

#[derive(Debug, Clone)]
struct CacheEntry {
    bytes: Bytes,
    last_accessed: u64,
}

/// Asset bytes keyed by URL, bounded by entry count and cumulative size.
///
/// Access times come from a monotonic counter rather than the wall clock so
/// that ordering is exact even for accesses within the same millisecond.
#[derive(Debug)]
pub struct AssetCache {
    entries: HashMap<String, CacheEntry>,
    max_entries: usize,
    max_bytes: u64,
    total_bytes: u64,
    access_counter: u64,
}

impl AssetCache {
    pub fn new(max_entries: usize, max_bytes: u64) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries,
            max_bytes,
            total_bytes: 0,
            access_counter: 0,
        }
    }

    fn next_access(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }

    /// Look up `url`, marking it as most recently used.
    pub fn get(&mut self, url: &str) -> Option<Bytes> {
        let now = self.next_access();
        let entry = self.entries.get_mut(url)?;
        entry.last_accessed = now;
        Some(entry.bytes.clone())
    }

    /// Insert `bytes` under `url`, evicting least recently used entries first.
    /// An object larger than the whole byte budget is still stored once the
    /// cache has been emptied.
    pub fn insert(&mut self, url: &str, bytes: Bytes) {
        if let Some(previous) = self.entries.remove(url) {
            self.total_bytes -= previous.bytes.len() as u64;
        }
        self.evict_if_needed(bytes.len() as u64);

        let now = self.next_access();
        self.total_bytes += bytes.len() as u64;
        self.entries.insert(
            url.to_string(),
            CacheEntry {
                bytes,
                last_accessed: now,
            },
        );
    }

    /// Evict until an object of `incoming` bytes fits. Returns the number of
    /// entries evicted.
    pub fn evict_if_needed(&mut self, incoming: u64) -> usize {
        let mut evicted = 0;
        while !self.entries.is_empty()
            && (self.entries.len() >= self.max_entries
                || self.total_bytes + incoming > self.max_bytes)
        {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(url, _)| url.clone());
            let Some(url) = oldest else { break };
            if let Some(entry) = self.entries.remove(&url) {
                self.total_bytes -= entry.bytes.len() as u64;
                debug!("Evicted {} ({} bytes) from asset cache", url, entry.bytes.len());
                evicted += 1;
            }
        }
        evicted
    }

    /// Access stamp of `url`; larger is more recent.
    pub fn last_accessed(&self, url: &str) -> Option<u64> {
        self.entries.get(url).map(|entry| entry.last_accessed)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn clear(&mut self) {
        info!("Clearing asset cache ({} entries)", self.entries.len());
        self.entries.clear();
        self.total_bytes = 0;
    }
}

/// Source of raw asset bytes.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetch the bytes behind `url`, failing with [`Error::Network`].
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

/// Reads assets from the local filesystem. Accepts `file://` URLs and paths,
/// resolving relative ones against `root`.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, url: &str) -> Result<PathBuf> {
        let path = match url.strip_prefix("file://") {
            Some(path) => path,
            None if url.contains("://") => {
                return Err(Error::Network(format!("unsupported asset url {}", url)))
            }
            None => url,
        };
        let path = Path::new(path);
        Ok(if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        })
    }
}

#[async_trait]
impl AssetFetcher for FileFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let path = self.resolve(url)?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Network(format!("failed to fetch {}: {}", url, e)))?;
        Ok(Bytes::from(data))
    }
}

/// Downloads `http://` and `https://` assets.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Network(format!("failed to build http client: {}", e)))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("failed to fetch {}: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Network(format!(
                "failed to fetch {}: HTTP {}",
                url, status
            )));
        }
        response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("failed to read {}: {}", url, e)))
    }
}

/// Routes `http(s)://` URLs to an [`HttpFetcher`] and everything else to a
/// [`FileFetcher`].
#[derive(Debug, Clone)]
pub struct UrlFetcher {
    file: FileFetcher,
    http: HttpFetcher,
}

impl UrlFetcher {
    pub fn new(file: FileFetcher, http: HttpFetcher) -> Self {
        Self { file, http }
    }

    fn is_remote(url: &str) -> bool {
        let lower = url.to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }
}

#[async_trait]
impl AssetFetcher for UrlFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        if Self::is_remote(url) {
            self.http.fetch(url).await
        } else {
            self.file.fetch(url).await
        }
    }
}

/// Shared handle that serves loads from the cache and fetches on a miss.
#[derive(Clone)]
pub struct AssetLoader {
    cache: Arc<Mutex<AssetCache>>,
    fetcher: Arc<dyn AssetFetcher>,
}

impl AssetLoader {
    pub fn new(cache: AssetCache, fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            cache: Arc::new(Mutex::new(cache)),
            fetcher,
        }
    }

    /// Lock the cache. A panic elsewhere cannot leave the map half-updated,
    /// so a poisoned lock is recovered.
    pub fn cache(&self) -> MutexGuard<'_, AssetCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load `url`. Concurrent misses on the same URL each fetch.
    pub async fn load(&self, url: &str) -> Result<Bytes> {
        let cached = self.cache().get(url);
        if let Some(bytes) = cached {
            debug!("Asset cache hit for {}", url);
            return Ok(bytes);
        }

        debug!("Asset cache miss for {}, fetching", url);
        let bytes = self.fetcher.fetch(url).await?;
        self.cache().insert(url, bytes.clone());
        Ok(bytes)
    }
}

impl std::fmt::Debug for AssetLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetLoader").finish_non_exhaustive()
    }
}
