//! Batch resolution of many keys with as few upstream calls as possible.
//!
//! ```text
//! keys ──probe (all gets in flight at once)──→ cached ───────────────┐
//!                                         └──→ pending ─chunk─→ fetch ┴─→ merged map
//! ```
//!
//! Chunks run one after another with a short pause between them so the
//! upstream API is never hit with the whole batch at once. A key whose
//! fetch fails is left out of the result; it never aborts its chunk or
//! the batch.

use futures_util::future::join_all;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

use crate::monitor::names;
use crate::service::CacheService;
use crate::tiered::CacheOptions;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub chunk_size: usize,
    pub inter_chunk_delay: Duration,
    /// Options for writing fetched values back to the cache.
    pub cache: CacheOptions,
    /// When `false`, skip both the cache probe and the write-back.
    pub use_cache: bool,
    /// Skip the probe but still write fetched values back.
    pub refresh: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            chunk_size: 5,
            inter_chunk_delay: Duration::from_millis(100),
            cache: CacheOptions::default(),
            use_cache: true,
            refresh: false,
        }
    }
}

impl BatchOptions {
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn inter_chunk_delay(mut self, delay: Duration) -> Self {
        self.inter_chunk_delay = delay;
        self
    }

    pub fn cache_options(mut self, cache: CacheOptions) -> Self {
        self.cache = cache;
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }
}

/// Outcome of the cache probe: what was found and what still needs a fetch.
#[derive(Debug, Clone)]
pub struct BatchRequest<K, T> {
    pub cached: HashMap<K, T>,
    /// Keys to fetch, deduplicated, in request order.
    pub pending: Vec<K>,
}

impl<K, T> BatchRequest<K, T> {
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub requested: usize,
    pub cached: usize,
    pub fetched: usize,
    pub failed: usize,
    pub chunks: usize,
    pub elapsed: Duration,
}

pub struct BatchResolver {
    service: CacheService,
    options: BatchOptions,
}

impl BatchResolver {
    pub fn new(service: CacheService, options: BatchOptions) -> Self {
        Self { service, options }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Look every key up in the cache concurrently and split the result.
    pub async fn probe<K, T, KF>(&self, items: &[K], key_of: KF) -> BatchRequest<K, T>
    where
        K: Clone + Eq + Hash,
        T: DeserializeOwned,
        KF: Fn(&K) -> String,
    {
        let unique = dedup(items);
        let keys: Vec<String> = unique.iter().map(|item| key_of(item)).collect();
        let lookups = keys.iter().map(|key| self.service.get::<T>(key));
        let found = join_all(lookups).await;

        let mut cached = HashMap::with_capacity(unique.len());
        let mut pending = Vec::new();
        for (item, value) in unique.into_iter().zip(found) {
            match value {
                Some(value) => {
                    cached.insert(item, value);
                }
                None => pending.push(item),
            }
        }
        BatchRequest { cached, pending }
    }

    /// Resolve items with a per-item fetcher. Items within a chunk are
    /// fetched concurrently; `Ok(None)` and `Err` leave the item out.
    pub async fn resolve_each<K, T, E, KF, F, Fut>(
        &self,
        items: &[K],
        key_of: KF,
        fetch: F,
    ) -> HashMap<K, T>
    where
        K: Clone + Eq + Hash + Debug,
        T: Serialize + DeserializeOwned,
        E: Display,
        KF: Fn(&K) -> String,
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let fetch = &fetch;
        self.resolve_chunked(items, key_of, |chunk: Vec<K>| async move {
            let fetched = join_all(chunk.into_iter().map(|item| async move {
                let result = fetch(item.clone()).await;
                (item, result)
            }))
            .await;

            let mut values = HashMap::with_capacity(fetched.len());
            for (item, result) in fetched {
                match result {
                    Ok(Some(value)) => {
                        values.insert(item, value);
                    }
                    Ok(None) => {
                        tracing::debug!(item = ?item, "batch fetch returned nothing");
                    }
                    Err(e) => {
                        tracing::warn!(item = ?item, error = %e, "batch fetch failed for item");
                    }
                }
            }
            Ok::<_, Infallible>(values)
        })
        .await
    }

    /// Resolve items with a per-chunk fetcher. A failing chunk leaves its
    /// items out; the remaining chunks still run.
    pub async fn resolve_chunked<K, T, E, KF, F, Fut>(
        &self,
        items: &[K],
        key_of: KF,
        mut fetch_chunk: F,
    ) -> HashMap<K, T>
    where
        K: Clone + Eq + Hash + Debug,
        T: Serialize + DeserializeOwned,
        E: Display,
        KF: Fn(&K) -> String,
        F: FnMut(Vec<K>) -> Fut,
        Fut: Future<Output = Result<HashMap<K, T>, E>>,
    {
        let start = Instant::now();
        let requested = dedup(items).len();

        let BatchRequest { mut cached, pending } = if self.options.use_cache && !self.options.refresh {
            self.probe(items, &key_of).await
        } else {
            BatchRequest {
                cached: HashMap::new(),
                pending: dedup(items),
            }
        };
        let cached_count = cached.len();

        tracing::debug!(
            cached = cached_count,
            pending = pending.len(),
            "batch cache probe complete"
        );

        if pending.is_empty() {
            self.record(BatchSummary {
                requested,
                cached: cached_count,
                fetched: 0,
                failed: 0,
                chunks: 0,
                elapsed: start.elapsed(),
            });
            return cached;
        }

        let chunk_size = self.options.chunk_size.max(1);
        let chunk_count = pending.len().div_ceil(chunk_size);
        let mut fetched: HashMap<K, T> = HashMap::with_capacity(pending.len());

        for (index, chunk) in pending.chunks(chunk_size).enumerate() {
            if index > 0 && !self.options.inter_chunk_delay.is_zero() {
                tokio::time::sleep(self.options.inter_chunk_delay).await;
            }

            let wanted: HashSet<&K> = chunk.iter().collect();
            match fetch_chunk(chunk.to_vec()).await {
                Ok(values) => {
                    for (item, value) in values {
                        if wanted.contains(&item) {
                            fetched.insert(item, value);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        chunk = index + 1,
                        chunks = chunk_count,
                        size = chunk.len(),
                        error = %e,
                        "batch chunk fetch failed"
                    );
                }
            }
        }

        if self.options.use_cache && !fetched.is_empty() {
            let keys: Vec<(String, &T)> = fetched.iter().map(|(item, value)| (key_of(item), value)).collect();
            let opts = &self.options.cache;
            join_all(keys.iter().map(|(key, value)| self.service.set(key, *value, opts))).await;
        }

        let fetched_count = fetched.len();
        cached.extend(fetched);

        self.record(BatchSummary {
            requested,
            cached: cached_count,
            fetched: fetched_count,
            failed: pending.len() - fetched_count,
            chunks: chunk_count,
            elapsed: start.elapsed(),
        });
        cached
    }

    fn record(&self, summary: BatchSummary) {
        metrics::counter!(names::CACHE_BATCH_KEYS_TOTAL, "source" => "cache")
            .increment(summary.cached as u64);
        metrics::counter!(names::CACHE_BATCH_KEYS_TOTAL, "source" => "fetch")
            .increment(summary.fetched as u64);
        metrics::counter!(names::CACHE_BATCH_KEYS_TOTAL, "source" => "failed")
            .increment(summary.failed as u64);

        let avg_ms = if summary.requested > 0 {
            summary.elapsed.as_millis() as u64 / summary.requested as u64
        } else {
            0
        };
        tracing::info!(
            requested = summary.requested,
            cached = summary.cached,
            fetched = summary.fetched,
            failed = summary.failed,
            chunks = summary.chunks,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            avg_ms,
            "batch resolved"
        );
    }
}

/// Drop repeated items, keeping first occurrences in order.
fn dedup<K: Clone + Eq + Hash>(items: &[K]) -> Vec<K> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .iter()
        .filter(|item| seen.insert(*item))
        .cloned()
        .collect()
}
