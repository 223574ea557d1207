//! Error types for the fingerprint module.

use std::path::PathBuf;

use thiserror::Error;

use super::FingerprintMode;

/// Errors raised while fingerprinting or comparing local files.
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// The file could not be stat'ed or read.
    #[error("IO error fingerprinting {path}: {source}")]
    Io {
        /// The file that failed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Two identities produced under different modes were compared.
    #[error("cannot compare a {left} fingerprint with a {right} fingerprint")]
    ModeMismatch {
        /// Mode of the receiver.
        left: FingerprintMode,
        /// Mode of the argument.
        right: FingerprintMode,
    },

    /// Reading or writing recorded identities failed.
    #[error("identity store error: {0}")]
    Database(#[from] sqlx::Error),
}

impl FingerprintError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
