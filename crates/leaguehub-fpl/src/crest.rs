//! Team crests.
//!
//! A crest is an SVG data URL derived from the team name, so the same
//! name always yields the same crest. Lookups go cache, then store, then
//! generation; generated crests are saved back to the store.

use leaguehub_cache::{BatchOptions, CacheOptions, CacheService, CacheStats};
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use crate::keys;
use crate::store::{CrestRecord, CrestStore};

pub const CREST_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrestOptions {
    /// Ignore cached and stored crests and generate anew.
    pub force_regenerate: bool,
    pub use_cache: bool,
    /// Names generated and saved per store round trip.
    pub batch_size: usize,
}

impl Default for CrestOptions {
    fn default() -> Self {
        Self {
            force_regenerate: false,
            use_cache: true,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrestMetrics {
    pub cache_stats: CacheStats,
    #[serde(rename = "databaseCrests")]
    pub stored_crests: u64,
}

pub struct CrestService {
    cache: CacheService,
    store: Arc<dyn CrestStore>,
    ttl: Duration,
}

impl CrestService {
    pub fn new(cache: CacheService, store: Arc<dyn CrestStore>) -> Self {
        Self {
            cache,
            store,
            ttl: CREST_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Crests for every name, keyed by name.
    ///
    /// Cached crests are probed together; the rest are looked up in the
    /// store and generated in chunks of `batch_size`. A failing store
    /// only means more crests get generated.
    pub async fn generate_crests(&self, team_names: &[String], opts: CrestOptions) -> HashMap<String, String> {
        let options = BatchOptions::default()
            .chunk_size(opts.batch_size)
            .inter_chunk_delay(Duration::ZERO)
            .cache_options(CacheOptions::with_ttl(self.ttl))
            .use_cache(opts.use_cache)
            .refresh(opts.force_regenerate);
        let force = opts.force_regenerate;

        self.cache
            .batch_with(options)
            .resolve_chunked(
                team_names,
                |name| keys::crest(name),
                |chunk: Vec<String>| async move {
                    Ok::<_, Infallible>(self.resolve_chunk(chunk, force).await)
                },
            )
            .await
    }

    async fn resolve_chunk(&self, names: Vec<String>, force: bool) -> HashMap<String, String> {
        let mut crests = if force {
            HashMap::new()
        } else {
            match self.store.find_many(&names).await {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(error = %e, "crest store lookup failed, generating instead");
                    HashMap::new()
                }
            }
        };
        let stored = crests.len();

        let records: Vec<CrestRecord> = names
            .iter()
            .filter(|name| !crests.contains_key(*name))
            .map(|name| CrestRecord::new(name.clone(), fallback_crest(name)))
            .collect();

        if !records.is_empty() {
            match self.store.save_many(&records).await {
                Ok(inserted) => tracing::debug!(inserted, "saved generated crests"),
                Err(e) => tracing::warn!(error = %e, count = records.len(), "failed to save generated crests"),
            }
        }

        tracing::debug!(stored, generated = records.len(), "crest chunk resolved");
        crests.extend(records.into_iter().map(|r| (r.team_name, r.crest_url)));
        crests
    }

    /// Crest for a single team.
    pub async fn team_crest(&self, team_name: &str, opts: CrestOptions) -> String {
        let key = keys::crest(team_name);
        let cache_opts = CacheOptions::with_ttl(self.ttl);

        if opts.use_cache
            && !opts.force_regenerate
            && let Some(cached) = self.cache.get::<String>(&key).await
        {
            return cached;
        }

        if !opts.force_regenerate {
            match self.store.find(team_name).await {
                Ok(Some(stored)) => {
                    if opts.use_cache {
                        self.cache.set(&key, &stored, &cache_opts).await;
                    }
                    return stored;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(team = team_name, error = %e, "crest store lookup failed, generating instead");
                }
            }
        }

        let crest = fallback_crest(team_name);

        let store = Arc::clone(&self.store);
        let record = CrestRecord::new(team_name, crest.clone());
        self.cache.spawn_tracked(async move {
            let team = record.team_name.clone();
            if let Err(e) = store.upsert(record).await {
                tracing::warn!(team = %team, error = %e, "failed to save crest");
            }
        });

        if opts.use_cache {
            self.cache.set(&key, &crest, &cache_opts).await;
        }
        crest
    }

    /// Clears the whole shared cache; there is no prefix delete.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
        tracing::info!("crest cache cleared");
    }

    pub async fn metrics(&self) -> CrestMetrics {
        let stored_crests = match self.store.count().await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "failed to count stored crests");
                0
            }
        };
        CrestMetrics {
            cache_stats: self.cache.stats(),
            stored_crests,
        }
    }
}

const COLOR_PAIRS: [(&str, &str); 10] = [
    ("#DC2626", "#FECACA"), // red
    ("#059669", "#A7F3D0"), // green
    ("#2563EB", "#DBEAFE"), // blue
    ("#7C3AED", "#E9D5FF"), // purple
    ("#EA580C", "#FED7AA"), // orange
    ("#BE185D", "#FECDD3"), // pink
    ("#0891B2", "#A5F3FC"), // cyan
    ("#65A30D", "#D9F99D"), // lime
    ("#4F46E5", "#C7D2FE"), // indigo
    ("#C2410C", "#FDBA74"), // amber
];

/// Deterministic SVG crest for a team name, as a `data:` URL.
pub fn fallback_crest(team_name: &str) -> String {
    let hash = name_hash(team_name);
    let (primary, secondary) = COLOR_PAIRS[(hash % 10) as usize];
    let initials = escape_xml(&initials(team_name));

    let svg = format!(
        concat!(
            r#"<svg width="64" height="64" viewBox="0 0 64 64" xmlns="http://www.w3.org/2000/svg">"#,
            r#"<defs><linearGradient id="grad{hash}" x1="0%" y1="0%" x2="100%" y2="100%">"#,
            r#"<stop offset="0%" style="stop-color:{primary};stop-opacity:1" />"#,
            r#"<stop offset="100%" style="stop-color:{secondary};stop-opacity:1" />"#,
            r#"</linearGradient></defs>"#,
            r#"<circle cx="32" cy="32" r="30" fill="url(#grad{hash})" stroke="{primary}" stroke-width="2"/>"#,
            r#"<text x="32" y="40" text-anchor="middle" fill="white" font-family="Arial, sans-serif" font-size="18" font-weight="bold">{initials}</text>"#,
            r#"</svg>"#,
        ),
        hash = hash,
        primary = primary,
        secondary = secondary,
        initials = initials,
    );

    format!("data:image/svg+xml;utf8,{}", urlencoding::encode(&svg))
}

/// 31-multiplier string hash over UTF-16 units with 32-bit wrapping.
/// Crests already stored elsewhere depend on these exact values.
fn name_hash(name: &str) -> u32 {
    let hash = name.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(i32::from(unit))
    });
    hash.unsigned_abs()
}

/// First letter of each word, uppercased, at most two letters.
fn initials(name: &str) -> String {
    name.split(' ')
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .take(2)
        .collect()
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
