//! Error types distinguished at the service boundary.
//!
//! Five kinds cross component boundaries, each with its own propagation
//! policy:
//!
//! | Kind | Policy |
//! |------|--------|
//! | [`ConfigError`] | Fatal at startup; names the offending variable or field |
//! | [`RateLimitError`] | Carries retry-after seconds; surfaced to the indexing operator |
//! | [`ApiError`] | Upstream HTTP failure; 429/5xx/network retried, the rest immediate |
//! | [`SearchError`] | Search pipeline failure; JSON-RPC `-32603` at the tool boundary |
//! | [`IngestionError`] | Aborts the indexing run; the checkpoint is left for resumption |

use std::path::PathBuf;

use thiserror::Error;

/// Missing or invalid environment / YAML configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),

    #[error("invalid value for environment variable {name}: {reason}")]
    InvalidEnv { name: &'static str, reason: String },

    #[error("config file not found: {0}")]
    MissingFile(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid field `{field}` in {path}: {reason}")]
    InvalidField {
        path: PathBuf,
        field: String,
        reason: String,
    },
}

/// A sliding-window rate-limit violation.
///
/// `retry_after_secs` is the number of whole seconds until the oldest
/// window entry expires and the call could succeed.
#[derive(Debug, Clone, Error)]
#[error("rate limit exceeded, retry after {retry_after_secs}s")]
pub struct RateLimitError {
    pub retry_after_secs: u64,
}

/// Upstream HTTP failure from the embedding provider or the vector store.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{service} request failed: {source}")]
    Network {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned HTTP {status}: {message}")]
    Status {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("{service} returned an unreadable response: {message}")]
    Malformed {
        service: &'static str,
        message: String,
    },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl ApiError {
    /// Transient failures worth another attempt: network errors, rate-limit
    /// responses, and server-side errors. Auth, validation, and dimension
    /// mismatches are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network { .. } => true,
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            ApiError::Malformed { .. } => false,
            ApiError::DimensionMismatch { .. } => false,
        }
    }
}

/// Failure of an embed or rerank call, either refused locally by the rate
/// limiter or failed upstream.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Search pipeline failure surfaced to the MCP client.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query embedding failed: {0}")]
    Embedding(#[source] EmbedError),

    #[error("vector store query failed: {0}")]
    Store(#[source] ApiError),
}

/// Per-batch indexing failure. The batch number is 0-based over the whole
/// chunk list, so the operator can relate it to the persisted checkpoint.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("collection setup failed: {0}")]
    Collection(#[source] ApiError),

    #[error("batch {batch} embedding failed: {source}")]
    Embed {
        batch: usize,
        #[source]
        source: EmbedError,
    },

    #[error("batch {batch} upsert failed: {source}")]
    Upsert {
        batch: usize,
        #[source]
        source: ApiError,
    },

    #[error("checkpoint I/O failed at {path}: {source}")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
