//! Tiered cache store: optional remote tier in front of the local tier.
//!
//! ## Lookup order
//!
//! ```text
//! get → remote (Redis) → local (DashMap) → miss
//! set → remote (Redis) ──failure──→ local (DashMap)
//! ```
//!
//! The tiers are independent. A value written while Redis was healthy
//! lives only in Redis; a value written during an outage lives only in
//! the local tier. No error from either tier reaches the caller: a slow
//! or broken Redis costs latency, never availability.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::codec::Codec;
use crate::error::{CacheError, Result};
use crate::local::{LocalStore, LocalTierStats};
use crate::monitor::{CacheMetricsSnapshot, CacheMonitor, Tier};
use crate::remote::{RemoteState, RemoteStore};

/// Default per-call timeout for the remote tier.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default TTL for writes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Per-write options.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub ttl: Duration,
    /// Write to the local tier when the remote write fails.
    pub fallback_to_memory: bool,
    /// For cache-or-fetch: write in a tracked background task instead of
    /// awaiting the write before returning.
    pub detach_write: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            fallback_to_memory: true,
            detach_write: false,
        }
    }
}

impl CacheOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Default::default()
        }
    }

    pub fn ttl_secs(secs: u64) -> Self {
        Self::with_ttl(Duration::from_secs(secs))
    }

    pub fn detached(mut self) -> Self {
        self.detach_write = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTierStats {
    pub connected: bool,
    pub retries: u32,
}

/// Everything the stats endpoint reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub redis: RemoteTierStats,
    pub memory: LocalTierStats,
    pub performance: CacheMetricsSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RemoteHealth {
    pub healthy: bool,
    /// Ping round trip in milliseconds.
    #[serde(rename = "latency", skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalHealth {
    pub healthy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub redis: RemoteHealth,
    pub memory: LocalHealth,
    /// The cache is usable whenever the local tier is, which is always.
    pub overall: bool,
}

pub struct TieredCache {
    remote: Option<Arc<dyn RemoteStore>>,
    remote_state: RemoteState,
    local: LocalStore,
    monitor: CacheMonitor,
    codec: Codec,
    operation_timeout: Duration,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("remote", &self.remote.as_ref().map(|r| r.name()))
            .field("remote_state", &self.remote_state)
            .field("local", &self.local.stats())
            .field("codec", &self.codec)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl TieredCache {
    /// Local tier only.
    pub fn local_only(local: LocalStore) -> Self {
        Self::builder(local).build()
    }

    pub fn builder(local: LocalStore) -> TieredCacheBuilder {
        TieredCacheBuilder {
            remote: None,
            local,
            codec: Codec::default(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn monitor(&self) -> &CacheMonitor {
        &self.monitor
    }

    /// Run a remote call under the operation timeout and update the
    /// connection state from its outcome. `None` means the tier is
    /// absent or currently skipped after a connection failure.
    async fn remote_call<'a, T, F, Fut>(&'a self, op: &'static str, key: &str, call: F) -> Option<Result<T>>
    where
        F: FnOnce(&'a dyn RemoteStore) -> Fut,
        Fut: Future<Output = Result<T>> + 'a,
    {
        let remote = self.remote.as_deref()?;
        if !self.remote_state.should_attempt() {
            tracing::trace!(op, key = %key, "skipping remote tier while disconnected");
            return None;
        }

        let result = match tokio::time::timeout(self.operation_timeout, call(remote)).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.operation_timeout)),
        };

        match &result {
            Ok(_) => self.remote_state.record_success(),
            Err(e) => self.remote_state.record_failure(e),
        }
        Some(result)
    }

    /// Remote read. Failures are logged and counted, and read as absent.
    async fn remote_get(&self, key: &str) -> Option<Vec<u8>> {
        match self.remote_call("get", key, |r| r.get(key)).await {
            Some(Ok(data)) => data,
            Some(Err(e)) => {
                tracing::warn!(key = %key, error = %e, "Redis get failed, falling back to memory");
                self.monitor.record_error();
                None
            }
            None => None,
        }
    }

    fn record_local_miss(&self, key: &str) {
        tracing::debug!(key = %key, "cache miss");
        self.monitor.record_miss();
    }

    /// Read raw bytes: remote first, then local.
    pub async fn get_raw(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        if let Some(data) = self.remote_get(key).await {
            tracing::debug!(key = %key, "cache hit (redis)");
            self.monitor.record_hit(Tier::Remote);
            return Some(Arc::new(data));
        }

        if let Some(data) = self.local.get(key) {
            tracing::debug!(key = %key, "cache hit (memory)");
            self.monitor.record_hit(Tier::Local);
            return Some(data);
        }

        self.record_local_miss(key);
        None
    }

    /// Read and decode a value, remote first.
    ///
    /// A payload that fails to decode is dropped from the tier that held
    /// it. A bad remote copy falls through to the local tier.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(data) = self.remote_get(key).await {
            match self.codec.decode::<T>(&data) {
                Ok(value) => {
                    tracing::debug!(key = %key, "cache hit (redis)");
                    self.monitor.record_hit(Tier::Remote);
                    return Some(value);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Failed to decode Redis value, discarding");
                    self.monitor.record_error();
                    if let Some(Err(e)) = self.remote_call("del", key, |r| r.del(key)).await {
                        tracing::warn!(key = %key, error = %e, "Redis delete failed");
                    }
                }
            }
        }

        let Some(data) = self.local.get(key) else {
            self.record_local_miss(key);
            return None;
        };
        match self.codec.decode::<T>(&data) {
            Ok(value) => {
                tracing::debug!(key = %key, "cache hit (memory)");
                self.monitor.record_hit(Tier::Local);
                Some(value)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to decode cached value, discarding");
                self.monitor.record_error();
                self.local.delete(key);
                None
            }
        }
    }

    /// Write raw bytes: remote first, local when the remote write fails
    /// or there is no remote tier.
    pub async fn set_raw(&self, key: &str, data: Vec<u8>, opts: &CacheOptions) {
        match self
            .remote_call("set", key, |r| r.set_ex(key, &data, opts.ttl))
            .await
        {
            Some(Ok(())) => {
                tracing::debug!(key = %key, ttl_secs = opts.ttl.as_secs(), "cache set (redis)");
                return;
            }
            Some(Err(e)) => {
                tracing::warn!(key = %key, error = %e, "Redis set failed, falling back to memory");
                self.monitor.record_error();
            }
            None => {}
        }

        if opts.fallback_to_memory || self.remote.is_none() {
            self.local.set(key, data, opts.ttl);
            tracing::debug!(key = %key, ttl_secs = opts.ttl.as_secs(), "cache set (memory)");
        }
    }

    /// Encode and write a value. Never fails; problems are logged and
    /// counted as errors.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, opts: &CacheOptions) {
        match self.codec.encode(value) {
            Ok(data) => self.set_raw(key, data, opts).await,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Failed to encode value for cache");
                self.monitor.record_error();
            }
        }
    }

    /// Remove a key from both tiers.
    pub async fn delete(&self, key: &str) {
        if let Some(Err(e)) = self.remote_call("del", key, |r| r.del(key)).await {
            tracing::warn!(key = %key, error = %e, "Redis delete failed");
        }
        self.local.delete(key);
    }

    /// Empty both tiers.
    pub async fn clear(&self) {
        if let Some(Err(e)) = self.remote_call("flush", "*", |r| r.flush()).await {
            tracing::warn!(error = %e, "Redis clear failed");
        }
        self.local.clear();
        tracing::info!("cache cleared");
    }

    /// Ping the remote tier and report per-tier health.
    ///
    /// The ping bypasses the reconnect delay so a health probe can see
    /// a recovered Redis immediately.
    pub async fn health_check(&self) -> HealthReport {
        let mut redis = RemoteHealth {
            healthy: false,
            latency_ms: None,
        };

        if let Some(remote) = self.remote.as_deref() {
            let start = Instant::now();
            let outcome = match tokio::time::timeout(self.operation_timeout, remote.ping()).await {
                Ok(result) => result,
                Err(_) => Err(CacheError::Timeout(self.operation_timeout)),
            };
            match outcome {
                Ok(()) => {
                    self.remote_state.record_success();
                    redis = RemoteHealth {
                        healthy: true,
                        latency_ms: Some(start.elapsed().as_millis() as u64),
                    };
                }
                Err(e) => {
                    tracing::error!(error = %e, "Redis health check failed");
                    self.remote_state.record_failure(&e);
                }
            }
        }

        let memory = LocalHealth { healthy: true };
        HealthReport {
            redis,
            memory,
            overall: memory.healthy,
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            redis: RemoteTierStats {
                connected: self.remote.is_some() && self.remote_state.is_connected(),
                retries: self.remote_state.retries(),
            },
            memory: self.local.stats(),
            performance: self.monitor.metrics(),
        }
    }
}

pub struct TieredCacheBuilder {
    remote: Option<Arc<dyn RemoteStore>>,
    local: LocalStore,
    codec: Codec,
    operation_timeout: Duration,
}

impl TieredCacheBuilder {
    pub fn remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn maybe_remote(mut self, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        self.remote = remote;
        self
    }

    pub fn codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn build(self) -> TieredCache {
        let connected = self.remote.is_some();
        TieredCache {
            remote: self.remote,
            remote_state: RemoteState::new(connected),
            local: self.local,
            monitor: CacheMonitor::new(),
            codec: self.codec,
            operation_timeout: self.operation_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::EvictionPolicy;
    use crate::remote::InMemoryRemote;

    fn with_remote() -> (TieredCache, Arc<InMemoryRemote>) {
        let remote = Arc::new(InMemoryRemote::new());
        let cache = TieredCache::builder(LocalStore::default())
            .remote(remote.clone())
            .build();
        (cache, remote)
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip_through_remote() {
        let (cache, remote) = with_remote();
        cache.set("k", &"value", &CacheOptions::ttl_secs(60)).await;

        assert!(remote.contains_key("k"));
        assert!(cache.local().is_empty(), "healthy remote write skips memory");
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("value"));

        let m = cache.monitor().metrics();
        assert_eq!((m.hits, m.misses, m.errors), (1, 0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn local_only_round_trip_and_expiry() {
        let cache = TieredCache::local_only(LocalStore::default());
        cache.set("k", &vec![1u32, 2, 3], &CacheOptions::ttl_secs(10)).await;
        assert_eq!(cache.get::<Vec<u32>>("k").await, Some(vec![1, 2, 3]));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get::<Vec<u32>>("k").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_expiry_is_honoured() {
        let (cache, _remote) = with_remote();
        cache.set("k", &1u8, &CacheOptions::ttl_secs(2)).await;
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(cache.get::<u8>("k").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_remote_falls_back_to_memory() {
        let (cache, remote) = with_remote();
        remote.set_available(false);

        cache.set("k", &"v", &CacheOptions::default()).await;
        assert_eq!(cache.local().len(), 1);

        // reconnect delay elapses so the next read tries Redis again
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("v"));

        let m = cache.monitor().metrics();
        assert_eq!(m.errors, 2, "one failed set, one failed get");
        assert_eq!(m.hits, 1);
        assert!(!cache.stats().redis.connected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_remote_is_skipped_until_retry_delay() {
        let (cache, remote) = with_remote();
        remote.set_available(false);

        assert_eq!(cache.get::<String>("a").await, None);
        assert_eq!(cache.get::<String>("b").await, None);
        assert_eq!(remote.get_calls(), 1, "second read skipped Redis");

        remote.set_available(true);
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(cache.get::<String>("c").await, None);
        assert_eq!(remote.get_calls(), 2);
        assert!(cache.stats().redis.connected);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_remote_times_out_and_falls_back() {
        let remote = Arc::new(InMemoryRemote::new());
        let cache = TieredCache::builder(LocalStore::default())
            .remote(remote.clone())
            .operation_timeout(Duration::from_millis(50))
            .build();
        remote.set_latency(Some(Duration::from_secs(1)));

        cache.set("k", &7u32, &CacheOptions::default()).await;
        assert_eq!(cache.local().len(), 1);
        assert!(!remote.contains_key("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_memory_fallback_when_disabled() {
        let (cache, remote) = with_remote();
        remote.set_available(false);
        let opts = CacheOptions {
            fallback_to_memory: false,
            ..Default::default()
        };
        cache.set("k", &"v", &opts).await;
        assert!(cache.local().is_empty());
    }

    #[tokio::test]
    async fn delete_and_clear_reach_both_tiers() {
        let (cache, remote) = with_remote();
        cache.set("remote", &1u8, &CacheOptions::default()).await;
        cache.local().set("local", b"2".to_vec(), Duration::from_secs(60));

        cache.delete("remote").await;
        cache.delete("local").await;
        assert!(!remote.contains_key("remote"));
        assert!(cache.local().is_empty());

        cache.set("again", &1u8, &CacheOptions::default()).await;
        cache.clear().await;
        assert!(remote.is_empty());
        // idempotent
        cache.clear().await;
        cache.delete("missing").await;
    }

    #[tokio::test(start_paused = true)]
    async fn delete_swallows_remote_failures() {
        let (cache, remote) = with_remote();
        cache.local().set("k", b"1".to_vec(), Duration::from_secs(60));
        remote.set_available(false);
        cache.delete("k").await;
        assert!(cache.local().is_empty());
        assert_eq!(remote.del_calls(), 1);
    }

    #[tokio::test]
    async fn undecodable_value_is_a_miss_and_removed() {
        let cache = TieredCache::local_only(LocalStore::default());
        cache.set("k", &"text", &CacheOptions::default()).await;
        assert_eq!(cache.get::<u64>("k").await, None);
        assert!(cache.local().is_empty());
    }

    #[tokio::test]
    async fn bad_remote_payload_falls_through_to_memory() {
        let (cache, remote) = with_remote();
        remote
            .set_ex("k", b"not json", Duration::from_secs(60))
            .await
            .unwrap();
        cache.local().set("k", b"7".to_vec(), Duration::from_secs(60));

        assert_eq!(cache.get::<u64>("k").await, Some(7));
        assert!(!remote.contains_key("k"));
        assert_eq!(cache.local().len(), 1);

        let m = cache.monitor().metrics();
        assert_eq!((m.hits, m.misses, m.errors), (1, 0, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn health_reports_remote_down_but_overall_up() {
        let (cache, remote) = with_remote();
        assert!(cache.health_check().await.redis.healthy);

        remote.set_available(false);
        let report = cache.health_check().await;
        assert!(!report.redis.healthy);
        assert!(report.memory.healthy);
        assert!(report.overall);
    }

    #[tokio::test]
    async fn local_only_health_and_stats() {
        let cache = TieredCache::local_only(LocalStore::new(5, EvictionPolicy::ExpiredOnly));
        let report = cache.health_check().await;
        assert!(!report.redis.healthy);
        assert!(report.overall);

        let stats = cache.stats();
        assert!(!stats.redis.connected);
        assert_eq!(stats.memory.max_size, 5);
    }

    #[tokio::test]
    async fn stats_and_health_serialize_camel_case() {
        let cache = TieredCache::local_only(LocalStore::new(5, EvictionPolicy::ExpiredOnly));
        let stats = serde_json::to_value(cache.stats()).unwrap();
        assert_eq!(stats["memory"]["maxSize"], 5);
        assert_eq!(stats["memory"]["size"], 0);
        assert_eq!(stats["performance"]["totalOperations"], 0);
        assert_eq!(stats["redis"]["retries"], 0);

        let (cache, _remote) = with_remote();
        let health = serde_json::to_value(cache.health_check().await).unwrap();
        assert!(health["redis"]["latency"].is_u64());
        assert!(health["redis"].get("latency_ms").is_none());
    }

    #[tokio::test]
    async fn messagepack_codec_round_trip() {
        let cache = TieredCache::builder(LocalStore::default())
            .codec(Codec::MessagePack)
            .build();
        cache
            .set("k", &serde_json::json!({"entry_name": "Klopp's Kids"}), &CacheOptions::default())
            .await;
        let back: serde_json::Value = cache.get("k").await.unwrap();
        assert_eq!(back["entry_name"], "Klopp's Kids");
    }
}
