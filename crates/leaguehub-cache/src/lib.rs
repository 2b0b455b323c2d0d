//! Tiered cache-aside layer for LeagueHub.
//!
//! ## Architecture
//!
//! - **Remote tier (Redis)**: shared across instances, optional
//! - **Local tier (DashMap)**: bounded, per-instance, always available
//! - **Monitor**: hit/miss/error counters with a derived hit rate
//! - **CacheService**: cache-or-fetch with retry and exponential backoff
//! - **BatchResolver**: probes many keys at once and fetches only the misses
//!
//! ## Graceful Degradation
//!
//! If Redis is not configured, unreachable or slow, every operation falls
//! through to the local tier. Cache failures are logged and counted; only
//! an upstream fetch that fails after all retries is reported to callers.

pub mod batch;
pub mod codec;
pub mod config;
pub mod error;
pub mod local;
pub mod monitor;
pub mod remote;
pub mod service;
pub mod tiered;

pub use batch::{BatchOptions, BatchRequest, BatchResolver, BatchSummary};
pub use codec::Codec;
pub use config::{CacheConfig, RedisConfig};
pub use error::{CacheError, FetchError};
pub use local::{EvictionPolicy, LocalStore, LocalTierStats};
pub use monitor::{CacheMetricsSnapshot, CacheMonitor};
pub use remote::{InMemoryRemote, RedisStore, RemoteStore, connect_remote};
pub use service::{CacheService, RetryPolicy};
pub use tiered::{CacheOptions, CacheStats, HealthReport, TieredCache};

use std::sync::Arc;
use std::time::Duration;

/// Create the application's cache service from configuration.
///
/// ## Cache Modes
///
/// - **No Redis URL**: local tier only
/// - **Redis URL set**: connects to Redis; falls back to local-only if the
///   initial connection fails
pub async fn build_cache_service(redis: &RedisConfig, cache: &CacheConfig) -> CacheService {
    let remote = connect_remote(redis)
        .await
        .map(|store| Arc::new(store) as Arc<dyn RemoteStore>);

    let mode = if remote.is_some() { "redis" } else { "memory" };
    tracing::info!(
        mode,
        local_max_entries = cache.local_max_entries,
        eviction = ?cache.eviction,
        codec = ?cache.codec,
        "Cache initialized"
    );

    let tiered = TieredCache::builder(LocalStore::new(cache.local_max_entries, cache.eviction))
        .maybe_remote(remote)
        .codec(cache.codec)
        .operation_timeout(redis.operation_timeout())
        .build();

    CacheService::new(tiered, retry_policy(cache), batch_options(cache))
}

fn retry_policy(cache: &CacheConfig) -> RetryPolicy {
    RetryPolicy::new(
        cache.retry_attempts,
        Duration::from_millis(cache.retry_base_delay_ms),
    )
}

fn batch_options(cache: &CacheConfig) -> BatchOptions {
    BatchOptions::default()
        .chunk_size(cache.batch_chunk_size)
        .inter_chunk_delay(Duration::from_millis(cache.batch_delay_ms))
        .cache_options(CacheOptions::with_ttl(cache.default_ttl()))
}
