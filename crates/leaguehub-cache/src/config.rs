use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::codec::Codec;
use crate::local::EvictionPolicy;

/// Redis (remote tier) configuration.
///
/// Leaving `url` unset is a supported deployment: the cache then runs on
/// the local tier only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Allow the remote tier. A URL is still required for it to activate.
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379").
    /// Falls back to the `REDIS_URL` environment variable when unset.
    #[serde(default)]
    pub url: Option<String>,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-command timeout in milliseconds
    #[serde(default = "default_redis_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    true
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_connect_timeout_ms() -> u64 {
    5000
}

fn default_redis_operation_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: None,
            pool_size: default_redis_pool_size(),
            connect_timeout_ms: default_redis_connect_timeout_ms(),
            operation_timeout_ms: default_redis_operation_timeout_ms(),
        }
    }
}

impl RedisConfig {
    /// The URL the remote tier should connect to, if any.
    ///
    /// Empty strings and placeholder URLs count as "not configured".
    pub fn effective_url(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let url = self
            .url
            .clone()
            .or_else(|| std::env::var("REDIS_URL").ok())?;
        let trimmed = url.trim();
        if trimmed.is_empty() || trimmed.contains("placeholder") {
            return None;
        }
        Some(trimmed.to_string())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Cache behaviour configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL used when a caller does not pass one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Local (in-process) tier capacity
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: usize,

    /// What the local tier does when it is full of live entries
    #[serde(default)]
    pub eviction: EvictionPolicy,

    /// Payload encoding for both tiers
    #[serde(default)]
    pub codec: Codec,

    /// Attempts made by cache-or-fetch before giving up
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// First backoff delay; doubled on every further retry
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Keys fetched per chunk by the batch resolver
    #[serde(default = "default_batch_chunk_size")]
    pub batch_chunk_size: usize,

    /// Pause between batch chunks
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_local_max_entries() -> usize {
    1000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_batch_chunk_size() -> usize {
    5
}

fn default_batch_delay_ms() -> u64 {
    100
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            local_max_entries: default_local_max_entries(),
            eviction: EvictionPolicy::default(),
            codec: Codec::default(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            batch_chunk_size: default_batch_chunk_size(),
            batch_delay_ms: default_batch_delay_ms(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.local_max_entries == 0 {
            return Err("cache.local_max_entries must be > 0".into());
        }
        if self.retry_attempts == 0 {
            return Err("cache.retry_attempts must be > 0".into());
        }
        if self.batch_chunk_size == 0 {
            return Err("cache.batch_chunk_size must be > 0".into());
        }
        if self.default_ttl_secs == 0 {
            return Err("cache.default_ttl_secs must be > 0".into());
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}
