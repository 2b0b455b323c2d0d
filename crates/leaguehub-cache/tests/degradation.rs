//! End-to-end behaviour of the cache when the remote tier misbehaves.

use leaguehub_cache::{
    BatchOptions, CacheOptions, CacheService, EvictionPolicy, InMemoryRemote, LocalStore,
    TieredCache,
};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn service(remote: Arc<InMemoryRemote>) -> CacheService {
    let cache = TieredCache::builder(LocalStore::new(100, EvictionPolicy::ExpiredOnly))
        .remote(remote)
        .operation_timeout(Duration::from_millis(200))
        .build();
    CacheService::with_defaults(cache)
}

#[tokio::test(start_paused = true)]
async fn outage_then_recovery() {
    let remote = Arc::new(InMemoryRemote::new());
    let svc = service(remote.clone());

    svc.set("before", &1u32, &CacheOptions::ttl_secs(60)).await;
    assert!(remote.contains_key("before"));

    remote.set_available(false);
    svc.set("during", &2u32, &CacheOptions::ttl_secs(60)).await;
    assert_eq!(svc.cache().local().len(), 1);
    assert!(!svc.health_check().await.redis.healthy);

    // the value written during the outage is still readable from memory
    assert_eq!(svc.get::<u32>("during").await, Some(2));

    remote.set_available(true);
    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(svc.get::<u32>("before").await, Some(1));
    assert!(svc.stats().redis.connected);
    assert_eq!(svc.stats().redis.retries, 0);
}

#[tokio::test(start_paused = true)]
async fn slow_remote_adds_latency_but_fetch_still_succeeds() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.set_latency(Some(Duration::from_secs(10)));
    let svc = service(remote);

    let calls = AtomicUsize::new(0);
    let value = svc
        .get_or_set("standings", &CacheOptions::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, std::io::Error>("fresh".to_string()) }
        })
        .await
        .unwrap();

    assert_eq!(value, "fresh");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let perf = svc.stats().performance;
    assert!(perf.errors >= 1);
}

#[tokio::test(start_paused = true)]
async fn batch_during_outage_uses_memory() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.set_available(false);
    let svc = service(remote);

    let ids: Vec<u32> = (1..=4).collect();
    let resolver = svc.batch_with(BatchOptions::default().inter_chunk_delay(Duration::ZERO));
    let first = resolver
        .resolve_each(&ids, |id| format!("crest:{id}"), |id| async move {
            Ok::<_, Infallible>(Some(format!("svg-{id}")))
        })
        .await;
    assert_eq!(first.len(), 4);

    let fetches = AtomicUsize::new(0);
    let second: HashMap<u32, String> = resolver
        .resolve_each(&ids, |id| format!("crest:{id}"), |id| {
            fetches.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, Infallible>(Some(format!("svg-{id}"))) }
        })
        .await;

    assert_eq!(second, first);
    assert_eq!(fetches.load(Ordering::SeqCst), 0, "served from the memory tier");
}
