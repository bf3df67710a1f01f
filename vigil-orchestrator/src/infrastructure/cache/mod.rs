//! Result cache keyed by (target, adapter, configuration fingerprint)
//!
//! Entries hold the serialized [`NormalizedResult`] and expire after their
//! own TTL. Computation goes through moka's per-key entry initialization, so
//! concurrent requests for one key run the adapter once and everyone else
//! awaits that result. Failures are never stored.
//!
//! With a cache directory configured, entries are also written to disk and
//! an in-memory miss consults the files before running the adapter.

mod file_cache;
mod fingerprint;

pub use file_cache::FileCache;
pub use fingerprint::content_fingerprint;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use moka::Expiry;
use moka::future::Cache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use vigil_core::config::CacheConfig;
use vigil_core::domain::{AdapterConfig, AdapterError, NormalizedResult, TargetIdentity};

use file_cache::Loaded;

/// SHA-256 over target identity, adapter name and configuration fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(target: &TargetIdentity, adapter: &str, config: &AdapterConfig) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(target.target_type.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(target.value.as_bytes());
        hasher.update([0u8]);
        hasher.update(adapter.as_bytes());
        hasher.update([0u8]);
        hasher.update(config.fingerprint().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Bind the key to the target's current contents.
    pub fn with_contents(self, fingerprint: Option<&str>) -> Self {
        let Some(fingerprint) = fingerprint else {
            return self;
        };
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hasher.update([0u8]);
        hasher.update(fingerprint.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Stored cache value
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub target: TargetIdentity,
    pub adapter: String,
    pub created_at: DateTime<Utc>,
    ttl: Duration,
    payload: Vec<u8>,
}

impl CacheEntry {
    fn encode(
        target: &TargetIdentity,
        adapter: &str,
        result: &NormalizedResult,
        ttl: Duration,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            target: target.clone(),
            adapter: adapter.to_string(),
            created_at: Utc::now(),
            ttl,
            payload: serde_json::to_vec(result)?,
        })
    }

    fn decode(&self) -> Result<NormalizedResult, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

struct EntryExpiry;

impl Expiry<String, Arc<CacheEntry>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub corrupt: u64,
    pub entries: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    corrupt: AtomicU64,
}

pub struct ResultCache {
    cache: Cache<String, Arc<CacheEntry>>,
    files: Option<FileCache>,
    enabled: bool,
    ttl: Duration,
    counters: Counters,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .expire_after(EntryExpiry)
            .support_invalidation_closures()
            .build();

        Self {
            cache,
            files: config.dir.as_ref().map(FileCache::new),
            enabled: config.enabled,
            ttl: config.ttl(),
            counters: Counters::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached result for `key`, if present and readable.
    pub async fn lookup(
        &self,
        key: &CacheKey,
        target: &TargetIdentity,
    ) -> Option<NormalizedResult> {
        if !self.enabled {
            return None;
        }
        let entry = match self.cache.get(key.as_str()).await {
            Some(entry) => entry,
            None => match self.load_file(key, target).await {
                Some(entry) => {
                    let entry = Arc::new(entry);
                    self.cache
                        .insert(key.as_str().to_string(), Arc::clone(&entry))
                        .await;
                    entry
                }
                None => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            },
        };
        match entry.decode() {
            Ok(result) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(result)
            }
            Err(e) => {
                self.evict_corrupt(key, &e).await;
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a successful result with the given TTL.
    pub async fn store(
        &self,
        key: &CacheKey,
        target: &TargetIdentity,
        adapter: &str,
        result: &NormalizedResult,
        ttl: Duration,
    ) {
        if !self.enabled {
            return;
        }
        match CacheEntry::encode(target, adapter, result, ttl) {
            Ok(entry) => {
                self.cache
                    .insert(key.as_str().to_string(), Arc::new(entry))
                    .await;
                self.save_file(key, target, adapter, result, ttl).await;
            }
            Err(e) => warn!(adapter, error = %e, "Result could not be serialized for caching"),
        }
    }

    /// Drop every entry for `target`, in memory and on disk.
    pub async fn invalidate(&self, target: &TargetIdentity) {
        let description = target.to_string();
        let owned = target.clone();
        match self
            .cache
            .invalidate_entries_if(move |_, entry| entry.target == owned)
        {
            Ok(_) => debug!(target = %description, "Cache entries invalidated"),
            Err(e) => warn!(target = %description, error = %e, "Cache invalidation failed"),
        }
        if let Some(files) = &self.files {
            let removed = files.invalidate(target).await;
            debug!(target = %description, removed, "Cache files invalidated");
        }
    }

    /// Return the cached result for `key` or run `compute` once to produce it.
    ///
    /// Concurrent callers with the same key share one computation. A waiter
    /// whose own token is cancelled stops waiting at once; the computing
    /// caller keeps going until `compute` returns. If the computing caller
    /// was cancelled or timed out, a waiter that is still live retries. The
    /// flag in the returned tuple is `true` when the adapter was not run by
    /// this caller.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        target: &TargetIdentity,
        adapter: &str,
        cancel: &CancellationToken,
        compute: F,
    ) -> Result<(NormalizedResult, bool), AdapterError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<NormalizedResult, AdapterError>>,
    {
        if !self.enabled {
            return compute().await.map(|result| (result, false));
        }

        loop {
            let led = AtomicBool::new(false);
            let restored = AtomicBool::new(false);
            let init = async {
                led.store(true, Ordering::Release);
                if let Some(entry) = self.load_file(key, target).await {
                    restored.store(true, Ordering::Release);
                    return Ok(Arc::new(entry));
                }
                let result = compute().await?;
                let entry = CacheEntry::encode(target, adapter, &result, self.ttl)
                    .map(Arc::new)
                    .map_err(|e| {
                        AdapterError::failure(adapter, format!("result is not serializable: {}", e))
                    })?;
                self.save_file(key, target, adapter, &result, self.ttl).await;
                Ok::<_, AdapterError>(entry)
            };

            let insert = self
                .cache
                .entry(key.as_str().to_string())
                .or_try_insert_with(init);
            tokio::pin!(insert);

            let mut cancel_seen = false;
            let outcome = loop {
                tokio::select! {
                    outcome = &mut insert => break outcome,
                    _ = cancel.cancelled(), if !cancel_seen => {
                        if led.load(Ordering::Acquire) {
                            cancel_seen = true;
                        } else {
                            debug!(adapter, "Cancelled while waiting on a shared computation");
                            return Err(AdapterError::cancelled(adapter));
                        }
                    }
                }
            };
            let led = led.load(Ordering::Acquire);

            match outcome {
                Ok(entry) => {
                    let shared = !entry.is_fresh() || restored.load(Ordering::Acquire);
                    let fresh = entry.is_fresh();
                    match entry.into_value().decode() {
                        Ok(result) => {
                            let counter = if shared {
                                &self.counters.hits
                            } else {
                                &self.counters.misses
                            };
                            counter.fetch_add(1, Ordering::Relaxed);
                            return Ok((result, shared));
                        }
                        Err(e) if fresh => {
                            return Err(AdapterError::failure(
                                adapter,
                                format!("cached result unreadable: {}", e),
                            ));
                        }
                        Err(e) => self.evict_corrupt(key, &e).await,
                    }
                }
                Err(error) => {
                    let error = (*error).clone();
                    let leader_gave_up = matches!(
                        error,
                        AdapterError::Cancelled { .. } | AdapterError::TimedOut { .. }
                    );
                    if leader_gave_up && !led && !cancel.is_cancelled() {
                        debug!(
                            adapter,
                            kind = error.kind(),
                            "Shared computation ended early; retrying"
                        );
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            corrupt: self.counters.corrupt.load(Ordering::Relaxed),
            entries: self.cache.entry_count(),
        }
    }

    /// Entry for `key` from the cache directory, carrying its remaining TTL.
    async fn load_file(&self, key: &CacheKey, target: &TargetIdentity) -> Option<CacheEntry> {
        let files = self.files.as_ref()?;
        match files.load(key, target).await {
            Loaded::Hit {
                adapter,
                result,
                created_at,
                remaining,
            } => match CacheEntry::encode(target, &adapter, &result, remaining) {
                Ok(mut entry) => {
                    entry.created_at = created_at;
                    debug!(key = key.as_str(), "Result restored from cache directory");
                    Some(entry)
                }
                Err(e) => {
                    warn!(key = key.as_str(), error = %e, "Cache file could not be restored");
                    None
                }
            },
            Loaded::Miss => None,
            Loaded::Corrupt(error) => {
                warn!(key = key.as_str(), error = %error, "Corrupt cache file removed");
                self.counters.corrupt.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn save_file(
        &self,
        key: &CacheKey,
        target: &TargetIdentity,
        adapter: &str,
        result: &NormalizedResult,
        ttl: Duration,
    ) {
        let Some(files) = &self.files else {
            return;
        };
        if let Err(e) = files.save(key, target, adapter, result, ttl).await {
            warn!(adapter, error = %e, "Result could not be written to cache directory");
        }
    }

    async fn evict_corrupt(&self, key: &CacheKey, error: &serde_json::Error) {
        warn!(key = key.as_str(), error = %error, "Corrupt cache entry evicted");
        self.counters.corrupt.fetch_add(1, Ordering::Relaxed);
        self.cache.invalidate(key.as_str()).await;
    }
}
