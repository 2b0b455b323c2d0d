use leaguehub_cache::{CacheConfig, RedisConfig};
use leaguehub_fpl::{FplCacheTtls, FplClientConfig};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Redis (remote cache tier) configuration
    #[serde(default)]
    pub redis: RedisConfig,
    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Upstream FPL API
    #[serde(default)]
    pub fpl: FplSettings,
    #[serde(default)]
    pub crests: CrestSettings,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.request_timeout_ms == 0 {
            return Err("server.request_timeout_ms must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        if self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        self.cache.validate()?;
        if !self.fpl.base_url.starts_with("http://") && !self.fpl.base_url.starts_with("https://") {
            return Err("fpl.base_url must be an http(s) URL".into());
        }
        if self.fpl.request_timeout_ms == 0 {
            return Err("fpl.request_timeout_ms must be > 0".into());
        }
        if self.crests.batch_size == 0 {
            return Err("crests.batch_size must be > 0".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    /// FPL client settings; retry pacing and batching follow `cache`.
    pub fn fpl_client_config(&self) -> FplClientConfig {
        FplClientConfig {
            base_url: self.fpl.base_url.clone(),
            request_timeout: Duration::from_millis(self.fpl.request_timeout_ms),
            retry_base_delay: Duration::from_millis(self.cache.retry_base_delay_ms),
            rate_limit_base_delay: Duration::from_millis(self.cache.retry_base_delay_ms * 2),
            fallback_gameweek: self.fpl.fallback_gameweek,
            batch_chunk_size: self.cache.batch_chunk_size,
            batch_delay: Duration::from_millis(self.cache.batch_delay_ms),
            ttls: FplCacheTtls::default(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Whole-request timeout, including upstream retries.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FplSettings {
    #[serde(default = "default_fpl_base_url")]
    pub base_url: String,
    #[serde(default = "default_fpl_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_fallback_gameweek")]
    pub fallback_gameweek: u32,
    /// Warm bootstrap and live data in the background at startup.
    #[serde(default)]
    pub preload_on_start: bool,
}

fn default_fpl_base_url() -> String {
    leaguehub_fpl::client::DEFAULT_BASE_URL.to_string()
}

fn default_fpl_timeout_ms() -> u64 {
    10_000
}

fn default_fallback_gameweek() -> u32 {
    6
}

impl Default for FplSettings {
    fn default() -> Self {
        Self {
            base_url: default_fpl_base_url(),
            request_timeout_ms: default_fpl_timeout_ms(),
            fallback_gameweek: default_fallback_gameweek(),
            preload_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrestSettings {
    #[serde(default = "default_crest_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_crest_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_crest_batch_size() -> usize {
    leaguehub_fpl::crest::DEFAULT_BATCH_SIZE
}

fn default_crest_ttl_secs() -> u64 {
    leaguehub_fpl::crest::CREST_TTL.as_secs()
}

impl Default for CrestSettings {
    fn default() -> Self {
        Self {
            batch_size: default_crest_batch_size(),
            ttl_secs: default_crest_ttl_secs(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "leaguehub.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., LEAGUEHUB__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("LEAGUEHUB")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
