use leaguehub_cache::{CacheService, build_cache_service};
use leaguehub_fpl::{CrestService, FplClient, MemoryCrestStore};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;

/// Shared handles every request handler can reach.
#[derive(Clone)]
pub struct AppState {
    pub cache: CacheService,
    pub fpl: Arc<FplClient>,
    pub crests: Arc<CrestService>,
    pub crest_batch_size: usize,
}

impl AppState {
    /// Connect the cache and build the services on top of it.
    pub async fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let cache = build_cache_service(&cfg.redis, &cfg.cache).await;
        Self::with_cache(cfg, cache)
    }

    /// Build the services over an existing cache.
    pub fn with_cache(cfg: &AppConfig, cache: CacheService) -> anyhow::Result<Self> {
        let fpl = FplClient::new(cfg.fpl_client_config(), cache.clone())?;
        let crests = CrestService::new(cache.clone(), Arc::new(MemoryCrestStore::new()))
            .with_ttl(Duration::from_secs(cfg.crests.ttl_secs));

        Ok(Self {
            cache,
            fpl: Arc::new(fpl),
            crests: Arc::new(crests),
            crest_batch_size: cfg.crests.batch_size,
        })
    }
}
