//! Error types for cache operations.

use std::sync::Arc;

/// Error type a fetcher may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Fetcher error shared between published state and direct awaiters.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for cache operations.
///
/// Errors are `Clone` because the same failure is both published on the
/// controller state and returned to whoever awaited the fetch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The fetcher failed.
    #[error("Fetch failed for '{key}': {source}")]
    FetchFailed {
        key: String,
        #[source]
        source: SharedError,
    },

    /// The request was superseded by a newer request on the same controller.
    ///
    /// Never published on controller state.
    #[error("Request for '{key}' was superseded")]
    Cancelled { key: String },

    /// The key holds a value of a different type than the caller expects.
    #[error("Type mismatch for '{key}': cached value is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    /// The controller is disabled.
    #[error("Controller for '{key}' is disabled")]
    Disabled { key: String },

    /// The background fetch task did not run to completion.
    #[error("Fetch task for '{key}' failed: {reason}")]
    TaskFailed { key: String, reason: String },
}

impl Error {
    /// Wrap a fetcher failure.
    pub fn fetch_failed(key: impl Into<String>, source: BoxError) -> Self {
        Self::FetchFailed {
            key: key.into(),
            source: Arc::from(source),
        }
    }

    /// Whether this is the internal supersession signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The key the error refers to.
    pub fn key(&self) -> &str {
        match self {
            Self::FetchFailed { key, .. }
            | Self::Cancelled { key }
            | Self::TypeMismatch { key, .. }
            | Self::Disabled { key }
            | Self::TaskFailed { key, .. } => key,
        }
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;
