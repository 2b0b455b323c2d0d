//! Cache-or-fetch orchestration.
//!
//! `CacheService` is the handle the rest of the application holds. It is
//! cheap to clone and carries the tiered store, the retry policy for
//! upstream fetches and the tracker for background cache writes.

use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;

use crate::batch::{BatchOptions, BatchResolver};
use crate::error::FetchError;
use crate::monitor::names;
use crate::tiered::{CacheOptions, CacheStats, HealthReport, TieredCache};

/// Exponential backoff for upstream fetches.
///
/// Attempt `n` (1-based) that fails is followed by a pause of
/// `base_delay * 2^(n-1)`: 1 s, 2 s, 4 s, ... with the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Pause after the given failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exp)
    }
}

struct Inner {
    cache: TieredCache,
    retry: RetryPolicy,
    batch: BatchOptions,
    tasks: TaskTracker,
}

#[derive(Clone)]
pub struct CacheService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("cache", &self.inner.cache)
            .field("retry", &self.inner.retry)
            .field("pending_writes", &self.inner.tasks.len())
            .finish()
    }
}

impl CacheService {
    pub fn new(cache: TieredCache, retry: RetryPolicy, batch: BatchOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                retry,
                batch,
                tasks: TaskTracker::new(),
            }),
        }
    }

    /// Service over `cache` with default retry and batch settings.
    pub fn with_defaults(cache: TieredCache) -> Self {
        Self::new(cache, RetryPolicy::default(), BatchOptions::default())
    }

    pub fn cache(&self) -> &TieredCache {
        &self.inner.cache
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry
    }

    /// Batch resolver using the configured chunking defaults.
    pub fn batch(&self) -> BatchResolver {
        BatchResolver::new(self.clone(), self.inner.batch.clone())
    }

    /// Batch resolver with explicit options.
    pub fn batch_with(&self, options: BatchOptions) -> BatchResolver {
        BatchResolver::new(self.clone(), options)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.inner.cache.get(key).await
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, opts: &CacheOptions) {
        self.inner.cache.set(key, value, opts).await
    }

    pub async fn delete(&self, key: &str) {
        self.inner.cache.delete(key).await
    }

    pub async fn clear(&self) {
        self.inner.cache.clear().await
    }

    pub async fn health_check(&self) -> HealthReport {
        self.inner.cache.health_check().await
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Return the cached value for `key`, or fetch, cache and return it.
    ///
    /// Every fetch error is retried. See [`Self::get_or_set_with`].
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        opts: &CacheOptions,
        fetch: F,
    ) -> Result<T, FetchError<E>>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_set_with(key, opts, fetch, |_| true).await
    }

    /// Cache-or-fetch with error classification.
    ///
    /// 1. A cache hit returns without calling `fetch`.
    /// 2. Otherwise `fetch` runs up to `max_attempts` times, sleeping
    ///    with exponential backoff between attempts. An error for which
    ///    `is_retryable` returns `false` ends the loop at once.
    /// 3. The first success is written to the cache (awaited, or in a
    ///    tracked background task with `detach_write`) and returned. A
    ///    failed cache write never fails the call.
    pub async fn get_or_set_with<T, E, F, Fut, R>(
        &self,
        key: &str,
        opts: &CacheOptions,
        fetch: F,
        is_retryable: R,
    ) -> Result<T, FetchError<E>>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
    {
        if let Some(cached) = self.inner.cache.get::<T>(key).await {
            return Ok(cached);
        }

        let value = self.fetch_with_retry(key, fetch, is_retryable).await?;
        self.store_fetched(key, &value, opts).await;
        Ok(value)
    }

    /// Run `fetch` under the retry policy without touching the cache.
    ///
    /// `label` only identifies the operation in logs.
    pub async fn fetch_with_retry<T, E, F, Fut, R>(
        &self,
        label: &str,
        fetch: F,
        is_retryable: R,
    ) -> Result<T, FetchError<E>>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
    {
        let policy = self.inner.retry;
        self.fetch_with_backoff(label, fetch, |e, attempt| {
            is_retryable(e).then(|| policy.delay_for(attempt))
        })
        .await
    }

    /// Like [`Self::fetch_with_retry`], but the caller picks the pause
    /// after each failed attempt. `backoff` returning `None` marks the
    /// error as terminal. The attempt limit still comes from the policy.
    pub async fn fetch_with_backoff<T, E, F, Fut, B>(
        &self,
        label: &str,
        mut fetch: F,
        backoff: B,
    ) -> Result<T, FetchError<E>>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        B: Fn(&E, u32) -> Option<Duration>,
    {
        let max_attempts = self.inner.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let e = match fetch().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let Some(delay) = backoff(&e, attempt) else {
                tracing::warn!(key = %label, attempt, error = %e, "fetch failed with non-retryable error");
                return Err(FetchError::Terminal { attempt, source: e });
            };
            if attempt >= max_attempts {
                tracing::error!(key = %label, attempts = attempt, error = %e, "fetch failed, retries exhausted");
                return Err(FetchError::Exhausted {
                    attempts: attempt,
                    source: e,
                });
            }

            tracing::warn!(
                key = %label,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "fetch failed, retrying"
            );
            metrics::counter!(names::CACHE_FETCH_RETRIES_TOTAL).increment(1);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn store_fetched<T: Serialize + ?Sized>(&self, key: &str, value: &T, opts: &CacheOptions) {
        if !opts.detach_write {
            self.inner.cache.set(key, value, opts).await;
            return;
        }

        match self.inner.cache.codec().encode(value) {
            Ok(data) => self.spawn_write(key.to_string(), data, opts.clone()),
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to encode value for cache");
                self.inner.cache.monitor().record_error();
            }
        }
    }

    /// Write already-encoded bytes in a background task that
    /// [`Self::shutdown`] waits for.
    pub fn spawn_write(&self, key: String, data: Vec<u8>, opts: CacheOptions) {
        let inner = Arc::clone(&self.inner);
        self.spawn_tracked(async move {
            inner.cache.set_raw(&key, data, &opts).await;
        });
    }

    /// Run best-effort background work that shutdown waits for.
    pub fn spawn_tracked<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.tasks.spawn(task);
    }

    /// Number of background writes still in flight.
    pub fn pending_writes(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Wait for every background write to finish.
    pub async fn shutdown(&self) {
        self.inner.tasks.close();
        let pending = self.inner.tasks.len();
        if pending > 0 {
            tracing::info!(pending, "draining background cache writes");
        }
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalStore;
    use crate::remote::InMemoryRemote;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use thiserror::Error;
    use tokio::time::Instant;

    #[derive(Debug, Error, PartialEq)]
    enum UpstreamError {
        #[error("upstream unavailable (call {0})")]
        Unavailable(usize),
        #[error("bad request")]
        BadRequest,
    }

    fn service() -> CacheService {
        CacheService::with_defaults(TieredCache::local_only(LocalStore::default()))
    }

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn cached_value_skips_fetch() {
        let svc = service();
        svc.set("k", &"cached", &CacheOptions::default()).await;

        let calls = AtomicUsize::new(0);
        let value: String = svc
            .get_or_set("k", &CacheOptions::default(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, UpstreamError>("fresh".to_string()) }
            })
            .await
            .unwrap();

        assert_eq!(value, "cached");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn miss_fetches_once_and_caches() {
        let svc = service();
        let calls = AtomicUsize::new(0);
        let fetch = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, UpstreamError>(42u32) }
        };

        assert_eq!(svc.get_or_set("k", &CacheOptions::default(), fetch).await.unwrap(), 42);
        assert_eq!(svc.get_or_set("k", &CacheOptions::default(), fetch).await.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_one_and_two_second_waits() {
        let svc = service();
        let calls = AtomicUsize::new(0);
        let start = Instant::now();

        let value = svc
            .get_or_set("k", &CacheOptions::default(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(UpstreamError::Unavailable(n))
                    } else {
                        Ok("third time".to_string())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "third time");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let waited = start.elapsed();
        assert!(
            waited >= Duration::from_secs(3) && waited < Duration::from_millis(3100),
            "waited {waited:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_error() {
        let svc = service();
        let calls = AtomicUsize::new(0);

        let err = svc
            .get_or_set::<String, _, _, _>("k", &CacheOptions::default(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(UpstreamError::Unavailable(n)) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 3);
        assert_eq!(err.into_inner(), UpstreamError::Unavailable(3));
        assert!(svc.get::<String>("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_errors_are_not_retried() {
        let svc = service();
        let calls = AtomicUsize::new(0);

        let err = svc
            .get_or_set_with::<String, _, _, _, _>(
                "k",
                &CacheOptions::default(),
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(UpstreamError::BadRequest) }
                },
                |e| !matches!(e, UpstreamError::BadRequest),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Terminal { attempt: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_backoff_controls_the_pause() {
        let svc = service();
        let calls = AtomicUsize::new(0);
        let start = Instant::now();

        let value = svc
            .fetch_with_backoff(
                "k",
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n == 1 {
                            Err(UpstreamError::Unavailable(n))
                        } else {
                            Ok(n)
                        }
                    }
                },
                |_, attempt| Some(Duration::from_secs(10 * attempt as u64)),
            )
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        // nothing is cached by a bare fetch
        assert!(svc.get::<usize>("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cache_write_failure_does_not_fail_fetch() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.set_available(false);
        let cache = TieredCache::builder(LocalStore::default())
            .remote(remote.clone())
            .build();
        let svc = CacheService::with_defaults(cache);
        let opts = CacheOptions {
            fallback_to_memory: false,
            ..Default::default()
        };

        let value = svc
            .get_or_set("k", &opts, || async { Ok::<_, UpstreamError>(7u8) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(svc.cache().local().is_empty());
    }

    #[tokio::test]
    async fn detached_writes_are_drained_on_shutdown() {
        let svc = service();
        let opts = CacheOptions::default().detached();

        let value = svc
            .get_or_set("k", &opts, || async { Ok::<_, UpstreamError>(vec![1u8, 2]) })
            .await
            .unwrap();
        assert_eq!(value, vec![1, 2]);

        svc.shutdown().await;
        assert_eq!(svc.pending_writes(), 0);
        assert_eq!(svc.get::<Vec<u8>>("k").await, Some(vec![1, 2]));
    }
}
