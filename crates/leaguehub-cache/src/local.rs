//! Bounded in-process cache tier.
//!
//! This is the tier that is always available. When Redis is missing or
//! failing, reads and writes land here.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Default number of entries held by the local tier.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// What `LocalStore::set` does once a cleanup sweep leaves the map full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Only expired entries are ever removed. A map full of live entries
    /// keeps growing past `max_size`.
    #[default]
    ExpiredOnly,
    /// Drop the least recently read entry to make room for a new key.
    LeastRecentlyUsed,
}

/// A locally cached payload.
///
/// The data is wrapped in `Arc` so hits hand out a cheap clone instead of
/// copying the payload.
#[derive(Clone, Debug)]
pub struct LocalEntry {
    pub data: Arc<Vec<u8>>,
    /// `None` means the TTL overflowed the clock and the entry never expires.
    pub expires_at: Option<Instant>,
    last_access: u64,
}

impl LocalEntry {
    fn new(data: Vec<u8>, ttl: Duration, now: Instant, tick: u64) -> Self {
        Self {
            data: Arc::new(data),
            expires_at: now.checked_add(ttl),
            last_access: tick,
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

/// Local tier statistics, as exposed on the stats endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalTierStats {
    pub size: usize,
    pub max_size: usize,
}

/// Bounded TTL map backed by `DashMap`.
///
/// Capacity is checked before each insert, so under concurrent writers
/// the map can briefly exceed `max_size` by the number of racing inserts.
#[derive(Debug)]
pub struct LocalStore {
    entries: DashMap<String, LocalEntry>,
    max_size: usize,
    policy: EvictionPolicy,
    clock: AtomicU64,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, EvictionPolicy::default())
    }
}

impl LocalStore {
    pub fn new(max_size: usize, policy: EvictionPolicy) -> Self {
        Self {
            entries: DashMap::new(),
            max_size: max_size.max(1),
            policy,
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Get a live entry. Expired entries are removed on sight.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let now = Instant::now();
        let mut entry = self.entries.get_mut(key)?;
        if entry.is_expired_at(now) {
            drop(entry);
            self.entries.remove_if(key, |_, e| e.is_expired_at(now));
            return None;
        }
        entry.last_access = self.tick();
        Some(Arc::clone(&entry.data))
    }

    /// Insert or replace an entry.
    ///
    /// At capacity, expired entries are swept first; what happens next
    /// depends on the eviction policy.
    pub fn set(&self, key: &str, data: Vec<u8>, ttl: Duration) {
        if self.entries.len() >= self.max_size {
            let swept = self.cleanup_expired();
            if swept > 0 {
                tracing::debug!(swept, "local cache swept expired entries");
            }

            if self.entries.len() >= self.max_size && !self.entries.contains_key(key) {
                match self.policy {
                    EvictionPolicy::ExpiredOnly => {
                        tracing::debug!(
                            key = %key,
                            size = self.entries.len(),
                            max_size = self.max_size,
                            "local cache full of live entries, inserting past capacity"
                        );
                    }
                    EvictionPolicy::LeastRecentlyUsed => {
                        if let Some(evicted) = self.evict_least_recently_used() {
                            tracing::debug!(key = %evicted, "local cache evicted LRU entry");
                        }
                    }
                }
            }
        }

        let entry = LocalEntry::new(data, ttl, Instant::now(), self.tick());
        self.entries.insert(key.to_string(), entry);
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired_at(now));
        before.saturating_sub(self.entries.len())
    }

    fn evict_least_recently_used(&self) -> Option<String> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().last_access)
            .map(|entry| entry.key().clone())?;
        self.entries.remove(&oldest);
        metrics::counter!(crate::monitor::names::CACHE_EVICTIONS_TOTAL).increment(1);
        Some(oldest)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn stats(&self) -> LocalTierStats {
        LocalTierStats {
            size: self.entries.len(),
            max_size: self.max_size,
        }
    }
}
