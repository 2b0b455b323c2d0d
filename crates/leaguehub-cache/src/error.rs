use std::time::Duration;

use thiserror::Error;

/// Errors raised by the cache tiers.
///
/// These never escape the public `TieredCache` read/write API; they are
/// logged and counted there. They surface from the `RemoteStore` trait so
/// that each tier can decide how to degrade.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Redis command error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Remote cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote cache unavailable: {0}")]
    Unavailable(String),

    #[error("Payload encode error: {0}")]
    Encode(String),

    #[error("Payload decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether the failure came from reaching the remote tier at all,
    /// as opposed to a command that reached Redis and failed there.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Pool(_) | Self::Timeout(_) | Self::Unavailable(_) => true,
            Self::Redis(e) => e.is_connection_refusal() || e.is_io_error() || e.is_timeout(),
            _ => false,
        }
    }
}

/// Failure of a cache-or-fetch call once the cache could not serve it.
///
/// Only the upstream fetch is fatal; cache read and write failures are
/// absorbed before this type is ever built.
#[derive(Debug, Error)]
pub enum FetchError<E> {
    #[error("fetch failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    #[error("fetch failed with a non-retryable error on attempt {attempt}: {source}")]
    Terminal {
        attempt: u32,
        #[source]
        source: E,
    },
}

impl<E> FetchError<E> {
    /// The error returned by the last fetch attempt.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { source, .. } | Self::Terminal { source, .. } => source,
        }
    }

    pub fn inner(&self) -> &E {
        match self {
            Self::Exhausted { source, .. } | Self::Terminal { source, .. } => source,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Terminal { attempt, .. } => *attempt,
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
