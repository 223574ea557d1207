//! Error type for the ingestion facade.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::db::DbError;
use crate::download::DownloadError;
use crate::emitter::EmitError;
use crate::fingerprint::FingerprintError;

/// Errors raised while ingesting one file, URL or buffer.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The emitter refused or failed to take the record.
    #[error("failed to emit record: {0}")]
    Emit(#[from] EmitError),

    /// Staging a buffer or resolving a local path failed.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A failure produced by a concurrent call for the same resource and
    /// handed to every call that waited on it.
    #[error(transparent)]
    Shared(Arc<IngestError>),
}

impl From<Arc<IngestError>> for IngestError {
    fn from(error: Arc<IngestError>) -> Self {
        Arc::try_unwrap(error).unwrap_or_else(Self::Shared)
    }
}

impl IngestError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable failure category, reported per item.
    ///
    /// Download failures report their own category (`http_status`,
    /// `retries_exhausted`, ...).
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Database(_) => "database",
            Self::Fingerprint(FingerprintError::ModeMismatch { .. }) => "mode_mismatch",
            Self::Fingerprint(FingerprintError::Database(_)) => "database",
            Self::Fingerprint(FingerprintError::Io { .. }) | Self::Io { .. } => "io",
            Self::Download(error) => error.reason().as_str(),
            Self::Cache(CacheError::InvalidUrl { .. }) => "invalid_url",
            Self::Cache(_) => "cache",
            Self::Emit(_) => "emit",
            Self::Shared(error) => error.reason(),
        }
    }
}
