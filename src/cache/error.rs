//! Error types for the content cache.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by [`super::ContentCache`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading, renaming or removing a cached file failed.
    #[error("cache IO error at {path}: {source}")]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The key index could not be read or written.
    #[error("cache index error: {0}")]
    Database(#[from] sqlx::Error),

    /// A URL could not be normalized into a cache key.
    #[error("cannot derive cache key from invalid URL: {url}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
    },

    /// An indexed entry no longer matches its backing file.
    ///
    /// Recovered internally by treating the entry as a miss; surfaced only
    /// through logs and [`super::CacheStats::evictions`].
    #[error("cache entry {key} is corrupt: {reason}")]
    Corruption {
        /// Key of the evicted entry.
        key: String,
        /// What did not match.
        reason: String,
    },
}

impl CacheError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a corruption error.
    pub fn corruption(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corruption {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
