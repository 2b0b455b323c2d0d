//! Fantasy Premier League data for LeagueHub.
//!
//! - [`FplClient`]: cached, retrying client for the public FPL API
//! - [`CrestService`]: generated team crests backed by a [`CrestStore`]
//!
//! Both sit on a shared [`leaguehub_cache::CacheService`]; neither owns
//! the cache.

pub mod client;
pub mod crest;
pub mod error;
pub mod keys;
pub mod store;
pub mod types;

pub use client::{ClearTarget, FetchMode, FplCacheTtls, FplClient, FplClientConfig, FplMetrics};
pub use crest::{CrestMetrics, CrestOptions, CrestService, fallback_crest};
pub use error::{CrestStoreError, FplError};
pub use store::{CrestRecord, CrestStore, DynCrestStore, MemoryCrestStore};
pub use types::{BootstrapStatic, GameweekEvent, League, LeagueStandings, StandingEntry, Standings};
