use leaguehub_cache::FetchError;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FplError {
    #[error("FPL API rate limited the request to {url}")]
    RateLimited { url: String },

    #[error("FPL API returned {status} for {url}")]
    Status { status: StatusCode, url: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid client configuration: {0}")]
    Configuration(String),
}

impl FplError {
    /// Whether another attempt may succeed: rate limiting, server errors
    /// and transport failures are retried, other client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FplError::RateLimited { .. } | FplError::Transport { .. } => true,
            FplError::Status { status, .. } => status.is_server_error(),
            FplError::Decode { .. } | FplError::Configuration(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FplError::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }

    /// Status the HTTP layer should answer with when this error surfaces.
    pub fn upstream_status(&self) -> Option<StatusCode> {
        match self {
            FplError::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            FplError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<FetchError<FplError>> for FplError {
    fn from(err: FetchError<FplError>) -> Self {
        err.into_inner()
    }
}

#[derive(Debug, Error)]
pub enum CrestStoreError {
    #[error("crest store unavailable: {0}")]
    Unavailable(String),

    #[error("crest store query failed: {0}")]
    Query(String),
}
