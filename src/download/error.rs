//! Error types for the download module.
//!
//! Every variant carries the URL (or path) it concerns so a failure can be
//! reported per resource without further context.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use super::task::FetchState;

/// Errors that can occur while fetching a remote resource.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Non-success HTTP response.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The raw `Retry-After` header value, if present.
        retry_after: Option<String>,
    },

    /// No response headers arrived within the connection timeout.
    #[error("no response from {url} within {timeout_ms} ms")]
    ConnectionTimeout {
        /// The URL that timed out.
        url: String,
        /// The configured connection timeout.
        timeout_ms: u64,
    },

    /// The body stopped producing bytes for longer than the stall timeout.
    #[error("transfer of {url} stalled for {timeout_ms} ms after {received_bytes} bytes")]
    StallTimeout {
        /// The URL whose transfer stalled.
        url: String,
        /// The configured stall timeout.
        timeout_ms: u64,
        /// Bytes received before the stall.
        received_bytes: u64,
    },

    /// Every allowed attempt failed with a transient error.
    #[error("gave up on {url} after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// The URL that could not be fetched.
        url: String,
        /// Attempts made, including the first.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        last: Box<DownloadError>,
    },

    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// File system error while writing the staged file.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The URL is malformed or uses an unsupported scheme.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// A passthrough header could not be encoded.
    #[error("invalid header {name:?} for {url}")]
    InvalidHeader {
        /// The URL the header was meant for.
        url: String,
        /// The offending header name.
        name: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// The coordinator was closed while the fetch waited for a slot.
    #[error("download coordinator closed before {url} could be fetched")]
    Closed {
        /// The URL that was waiting.
        url: String,
    },

    /// A fetch task was driven through a transition its state does not allow.
    #[error("fetch task for {url} cannot {event} while {state}")]
    InvalidTransition {
        /// The task's URL.
        url: String,
        /// The state the task was in.
        state: FetchState,
        /// The rejected event.
        event: &'static str,
    },
}

/// Coarse failure reason reported per resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    HttpStatus,
    ConnectionTimeout,
    StallTimeout,
    RetriesExhausted,
    Network,
    Io,
    InvalidUrl,
    Internal,
}

impl FailureReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HttpStatus => "http_status",
            Self::ConnectionTimeout => "connection_timeout",
            Self::StallTimeout => "stall_timeout",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Network => "network",
            Self::Io => "io",
            Self::InvalidUrl => "invalid_url",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a connection timeout error.
    pub fn connection_timeout(url: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::ConnectionTimeout {
            url: url.into(),
            timeout_ms: duration_ms(timeout),
        }
    }

    /// Creates a stall timeout error.
    pub fn stall_timeout(
        url: impl Into<String>,
        timeout: std::time::Duration,
        received_bytes: u64,
    ) -> Self {
        Self::StallTimeout {
            url: url.into(),
            timeout_ms: duration_ms(timeout),
            received_bytes,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// The coarse reason for this failure.
    #[must_use]
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::HttpStatus { .. } => FailureReason::HttpStatus,
            Self::ConnectionTimeout { .. } => FailureReason::ConnectionTimeout,
            Self::StallTimeout { .. } => FailureReason::StallTimeout,
            Self::RetriesExhausted { .. } => FailureReason::RetriesExhausted,
            Self::Network { .. } => FailureReason::Network,
            Self::Io { .. } => FailureReason::Io,
            Self::InvalidUrl { .. } | Self::InvalidHeader { .. } => FailureReason::InvalidUrl,
            Self::ClientBuild(_) | Self::Closed { .. } | Self::InvalidTransition { .. } => {
                FailureReason::Internal
            }
        }
    }

    /// The HTTP status behind this failure, looking through retry exhaustion.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
