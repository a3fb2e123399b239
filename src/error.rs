//! Centralized error types for mailharvest.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailharvest library.
#[derive(Error, Debug)]
pub enum HarvestError {
    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration is incomplete or could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connecting, authenticating or searching the mailbox failed.
    #[error("Mailbox error: {0}")]
    Mailbox(String),

    /// A message could not be parsed as MIME.
    #[error("MIME decoding error: {0}")]
    Mime(String),

    /// The blob store rejected an upload.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A warehouse query or insert failed.
    #[error("Warehouse error: {0}")]
    Warehouse(String),

    /// A spreadsheet attachment could not be read.
    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),
}

/// Failures reported by the inference service.
///
/// Only [`InferenceError::RateLimited`] is worth retrying against the same
/// model; every other kind abandons the model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// Quota exhausted or too many requests.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The service answered, but not with a usable JSON object.
    #[error("invalid response: {0}")]
    Invalid(String),

    /// Network failure or server-side error.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The request itself was rejected (bad key, unknown model, ...).
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl InferenceError {
    /// Whether this failure should be retried after a backoff.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

/// Convenience alias for `Result<T, HarvestError>`.
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available.
impl From<std::io::Error> for HarvestError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
