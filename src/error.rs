//! Error types for mirror operations.

use std::io;
use thiserror::Error;

/// Failure of a single HTTP attempt.
///
/// Only transport-level failures are retryable. A completed request with a
/// non-2xx status is not an error at this level; callers inspect the status.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The request or body read exceeded the configured timeout.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection could not be established (refused, DNS failure).
    #[error("connection failed: {0}")]
    Connect(String),

    /// The connection broke while sending the request or reading the body.
    #[error("connection interrupted: {0}")]
    Interrupted(String),

    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Any other request failure (invalid URL, redirect loop, ...).
    #[error(transparent)]
    Request(reqwest::Error),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_) | FetchError::Connect(_) | FetchError::Interrupted(_)
        )
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        // Timeout first: a timed out body read also reports is_body().
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else if err.is_connect() {
            FetchError::Connect(err.to_string())
        } else if err.is_request() || err.is_body() {
            FetchError::Interrupted(err.to_string())
        } else if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::Request(err)
        }
    }
}

/// Errors that can occur during mirror operations.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// I/O error during file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// HTTP client could not be constructed.
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// A retryable failure persisted through every attempt.
    #[error("{retries} retries failed for {url}: {source}")]
    RetriesExhausted {
        url: String,
        retries: u32,
        #[source]
        source: FetchError,
    },

    /// A failure that is not worth retrying.
    #[error("request to {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    /// The snapshot index endpoint answered with a non-success status.
    #[error("snapshot index request rejected with HTTP {status}")]
    IndexRejected { status: u16 },

    /// The snapshot index is not a JSON array of `[timestamp, original]` rows.
    #[error("malformed snapshot index: {0}")]
    MalformedIndex(String),
}
