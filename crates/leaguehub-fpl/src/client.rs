//! Cached client for the public Fantasy Premier League API.
//!
//! Every read goes through the shared cache first. Misses are fetched
//! with retries: rate-limited requests back off twice as long as server
//! errors, and other client errors fail at once.

use leaguehub_cache::{BatchOptions, CacheOptions, CacheService, CacheStats};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::FplError;
use crate::keys;
use crate::types::{BootstrapStatic, LeagueStandings};

pub const DEFAULT_BASE_URL: &str = "https://fantasy.premierleague.com/api";

/// The API rejects obvious non-browser clients.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Cache lifetimes per kind of payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FplCacheTtls {
    pub league_standings: Duration,
    pub team_data: Duration,
    pub gameweek_live: Duration,
    pub bootstrap_static: Duration,
    pub player_data: Duration,
}

impl Default for FplCacheTtls {
    fn default() -> Self {
        Self {
            league_standings: Duration::from_secs(300),
            team_data: Duration::from_secs(600),
            gameweek_live: Duration::from_secs(1800),
            bootstrap_static: Duration::from_secs(3600),
            player_data: Duration::from_secs(900),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FplClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub request_timeout: Duration,
    /// Base pause after a server or transport error, doubled per attempt.
    pub retry_base_delay: Duration,
    /// Base pause after HTTP 429, doubled per attempt.
    pub rate_limit_base_delay: Duration,
    /// Gameweek assumed when the bootstrap data names no current event.
    pub fallback_gameweek: u32,
    pub batch_chunk_size: usize,
    pub batch_delay: Duration,
    pub ttls: FplCacheTtls,
}

impl Default for FplClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(10),
            retry_base_delay: Duration::from_secs(1),
            rate_limit_base_delay: Duration::from_secs(2),
            fallback_gameweek: 6,
            batch_chunk_size: 5,
            batch_delay: Duration::from_millis(100),
            ttls: FplCacheTtls::default(),
        }
    }
}

impl FplClientConfig {
    /// Pause before retrying after `err` on the given attempt, or `None`
    /// when the error is not worth retrying.
    pub fn backoff(&self, err: &FplError, attempt: u32) -> Option<Duration> {
        if !err.is_retryable() {
            return None;
        }
        let base = match err {
            FplError::RateLimited { .. } => self.rate_limit_base_delay,
            _ => self.retry_base_delay,
        };
        Some(base.saturating_mul(1 << attempt.min(16)))
    }
}

/// How a read treats the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchMode {
    /// Skip the cache read and always ask the API.
    pub force_fresh: bool,
    /// On fetch failure, fall back to whatever the cache still holds.
    pub use_stale: bool,
}

impl Default for FetchMode {
    fn default() -> Self {
        Self {
            force_fresh: false,
            use_stale: true,
        }
    }
}

impl FetchMode {
    pub fn fresh() -> Self {
        Self {
            force_fresh: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearTarget {
    /// First standings page of a league.
    League(u64),
    Team(u64),
    Gameweek(u32),
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FplMetrics {
    pub cache_stats: CacheStats,
    #[serde(rename = "apiHealth")]
    pub api_healthy: bool,
}

pub struct FplClient {
    http: reqwest::Client,
    cache: CacheService,
    config: FplClientConfig,
}

impl std::fmt::Debug for FplClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FplClient")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

impl FplClient {
    pub fn new(config: FplClientConfig, cache: CacheService) -> Result<Self, FplError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FplError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            cache,
            config,
        })
    }

    pub fn config(&self) -> &FplClientConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    /// Standings page of a classic league.
    ///
    /// With `use_stale`, a failed fetch still answers from the cache when
    /// it holds the page, which matters for `force_fresh` reads.
    pub async fn league_standings(
        &self,
        league_id: u64,
        page: u32,
        mode: FetchMode,
    ) -> Result<LeagueStandings, FplError> {
        let key = keys::league_standings(league_id, page);
        let path = format!(
            "/leagues-classic/{league_id}/standings/?page_new_entries=1&page_standings={page}&phase=1"
        );

        match self
            .cached(&key, &path, self.config.ttls.league_standings, mode.force_fresh)
            .await
        {
            Ok(standings) => Ok(standings),
            Err(e) => {
                if mode.use_stale
                    && let Some(stale) = self.cache.get::<LeagueStandings>(&key).await
                {
                    tracing::warn!(league_id, page, error = %e, "serving cached standings after fetch failure");
                    return Ok(stale);
                }
                Err(e)
            }
        }
    }

    pub async fn team_data(&self, team_id: u64, force_fresh: bool) -> Result<Value, FplError> {
        self.cached(
            &keys::team(team_id),
            &format!("/entry/{team_id}/"),
            self.config.ttls.team_data,
            force_fresh,
        )
        .await
    }

    pub async fn team_picks(&self, team_id: u64, gameweek: u32) -> Result<Value, FplError> {
        self.cached(
            &keys::team_picks(team_id, gameweek),
            &format!("/entry/{team_id}/event/{gameweek}/picks/"),
            self.config.ttls.team_data,
            false,
        )
        .await
    }

    pub async fn gameweek_live(&self, gameweek: u32, force_fresh: bool) -> Result<Value, FplError> {
        self.cached(
            &keys::gameweek_live(gameweek),
            &format!("/event/{gameweek}/live/"),
            self.config.ttls.gameweek_live,
            force_fresh,
        )
        .await
    }

    pub async fn bootstrap_static(&self, force_fresh: bool) -> Result<BootstrapStatic, FplError> {
        self.cached(
            keys::BOOTSTRAP_STATIC,
            "/bootstrap-static/",
            self.config.ttls.bootstrap_static,
            force_fresh,
        )
        .await
    }

    /// Team data for many teams. Teams that cannot be fetched are left
    /// out of the map.
    pub async fn batch_team_data(&self, team_ids: &[u64]) -> HashMap<u64, Value> {
        let options = BatchOptions::default()
            .chunk_size(self.config.batch_chunk_size)
            .inter_chunk_delay(self.config.batch_delay)
            .cache_options(CacheOptions::with_ttl(self.config.ttls.team_data));

        self.cache
            .batch_with(options)
            .resolve_each(
                team_ids,
                |id| keys::team(*id),
                |id| async move {
                    self.fetch::<Value>(&format!("/entry/{id}/"))
                        .await
                        .map(Some)
                },
            )
            .await
    }

    pub async fn current_gameweek(&self) -> u32 {
        match self.bootstrap_static(false).await {
            Ok(bootstrap) => bootstrap
                .current_event()
                .map(|event| event.id)
                .unwrap_or(self.config.fallback_gameweek),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    fallback = self.config.fallback_gameweek,
                    "could not determine current gameweek"
                );
                self.config.fallback_gameweek
            }
        }
    }

    /// Warm the cache with the payloads nearly every page needs.
    pub async fn preload_common_data(&self) {
        tracing::info!("preloading common FPL data");
        if let Err(e) = self.bootstrap_static(false).await {
            tracing::error!(error = %e, "failed to preload bootstrap data");
            return;
        }
        let gameweek = self.current_gameweek().await;
        match self.gameweek_live(gameweek, false).await {
            Ok(_) => tracing::info!(gameweek, "common FPL data preloaded"),
            Err(e) => tracing::error!(gameweek, error = %e, "failed to preload live gameweek data"),
        }
    }

    pub async fn clear_cache(&self, target: ClearTarget) {
        match target {
            ClearTarget::League(id) => self.cache.delete(&keys::league_standings(id, 1)).await,
            ClearTarget::Team(id) => self.cache.delete(&keys::team(id)).await,
            ClearTarget::Gameweek(gw) => self.cache.delete(&keys::gameweek_live(gw)).await,
            ClearTarget::All => self.cache.clear().await,
        }
        tracing::info!(?target, "FPL cache cleared");
    }

    /// Cache statistics plus a single unretried probe of the API.
    pub async fn metrics(&self) -> FplMetrics {
        let api_healthy = match self.request::<Value>("/bootstrap-static/").await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "FPL API health probe failed");
                false
            }
        };
        FplMetrics {
            cache_stats: self.cache.stats(),
            api_healthy,
        }
    }

    async fn cached<T>(
        &self,
        key: &str,
        path: &str,
        ttl: Duration,
        force_fresh: bool,
    ) -> Result<T, FplError>
    where
        T: Serialize + DeserializeOwned,
    {
        if !force_fresh && let Some(hit) = self.cache.get::<T>(key).await {
            tracing::debug!(key, "FPL cache hit");
            return Ok(hit);
        }

        let start = Instant::now();
        let value: T = self.fetch(path).await?;
        tracing::debug!(
            key,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "fetched from FPL API"
        );

        self.cache.set(key, &value, &CacheOptions::with_ttl(ttl)).await;
        Ok(value)
    }

    /// GET with retries.
    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> Result<T, FplError> {
        self.cache
            .fetch_with_backoff(
                path,
                || self.request::<T>(path),
                |e, attempt| self.config.backoff(e, attempt),
            )
            .await
            .map_err(FplError::from)
    }

    /// A single GET, classified into retryable and terminal failures.
    async fn request<T: DeserializeOwned>(&self, path: &str) -> Result<T, FplError> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| FplError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FplError::RateLimited { url });
        }
        if !status.is_success() {
            return Err(FplError::Status { status, url });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| FplError::Decode { url, source })
    }
}
