//! Remote cache tier.
//!
//! `RemoteStore` is the seam between the tiered cache and whatever shared
//! store sits behind it. `RedisStore` is the production implementation;
//! `InMemoryRemote` is an in-process stand-in with failure injection,
//! used for local development and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::Pool;
use parking_lot::Mutex;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::RedisConfig;
use crate::error::{CacheError, Result};

/// Operations the tiered cache needs from a remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short name for logs and stats.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Drop every key in the store's database.
    async fn flush(&self) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

/// Redis-backed remote tier over a deadpool connection pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.pool.get().await?;
        let value = conn.get::<_, Option<Vec<u8>>>(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get().await?;
        // SETEX rejects a zero expiry
        let ttl_secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Build a Redis remote tier from configuration.
///
/// Returns `None` when Redis is not configured or cannot be reached, in
/// which case the cache runs on the local tier alone.
pub async fn connect_remote(config: &RedisConfig) -> Option<RedisStore> {
    let Some(url) = config.effective_url() else {
        tracing::info!("Redis URL not configured, using memory cache only");
        return None;
    };

    tracing::info!(url = %redact_url(&url), "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(url);
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size.max(1));
    pool_config.timeouts.wait = Some(config.connect_timeout());
    pool_config.timeouts.create = Some(config.connect_timeout());
    pool_config.timeouts.recycle = Some(config.connect_timeout());
    redis_config.pool = Some(pool_config);

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to memory cache."
            );
            return None;
        }
    };

    let store = RedisStore::new(pool);
    match tokio::time::timeout(config.connect_timeout(), store.ping()).await {
        Ok(Ok(())) => {
            tracing::info!("Connected to Redis");
            Some(store)
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed to connect to Redis. Falling back to memory cache.");
            None
        }
        Err(_) => {
            tracing::warn!(
                timeout_ms = config.connect_timeout_ms,
                "Timed out connecting to Redis. Falling back to memory cache."
            );
            None
        }
    }
}

/// Strip credentials from a Redis URL before logging it.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

/// Connection bookkeeping for the remote tier.
///
/// After a connection failure the tier is skipped until a reconnect delay
/// has passed: `min(retries * 500ms, 2s)`. A success resets everything.
#[derive(Debug)]
pub struct RemoteState {
    connected: AtomicBool,
    retries: AtomicU32,
    retry_at: Mutex<Option<Instant>>,
}

const RECONNECT_STEP: Duration = Duration::from_millis(500);
const RECONNECT_MAX: Duration = Duration::from_secs(2);

impl RemoteState {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            retries: AtomicU32::new(0),
            retry_at: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Consecutive connection failures since the last success.
    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Whether the remote tier should be tried right now.
    pub fn should_attempt(&self) -> bool {
        if self.is_connected() {
            return true;
        }
        match *self.retry_at.lock() {
            Some(at) => Instant::now() >= at,
            None => true,
        }
    }

    pub fn record_success(&self) {
        if !self.connected.swap(true, Ordering::Relaxed) {
            tracing::info!("Redis connection restored");
        }
        self.retries.store(0, Ordering::Relaxed);
        *self.retry_at.lock() = None;
    }

    /// Record a failed remote call. Only connection-level failures mark
    /// the tier as disconnected.
    pub fn record_failure(&self, err: &CacheError) {
        if !err.is_connection_error() {
            return;
        }
        self.connected.store(false, Ordering::Relaxed);
        let retries = self.retries.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        let delay = (RECONNECT_STEP * retries).min(RECONNECT_MAX);
        *self.retry_at.lock() = Some(Instant::now() + delay);
    }
}

/// In-process remote tier with switchable availability and call counts.
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    entries: DashMap<String, (Vec<u8>, Instant)>,
    unavailable: AtomicBool,
    latency: Mutex<Option<Duration>>,
    get_calls: AtomicUsize,
    set_calls: AtomicUsize,
    del_calls: AtomicUsize,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the server refusing connections.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Relaxed);
    }

    /// Delay every call by `latency`, to exercise operation timeouts.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::Relaxed)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::Relaxed)
    }

    pub fn del_calls(&self) -> usize {
        self.del_calls.load(Ordering::Relaxed)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| Instant::now() < entry.1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn enter(&self) -> Result<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(CacheError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    fn name(&self) -> &'static str {
        "memory-remote"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        self.enter().await?;
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|entry| now < entry.1)
            .map(|entry| entry.0.clone());
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::Relaxed);
        self.enter().await?;
        let ttl = ttl.max(Duration::from_secs(1));
        let expires = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| CacheError::Encode("ttl out of range".into()))?;
        self.entries.insert(key.to_string(), (value.to_vec(), expires));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.del_calls.fetch_add(1, Ordering::Relaxed);
        self.enter().await?;
        self.entries.remove(key);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.enter().await?;
        self.entries.clear();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.enter().await
    }
}
