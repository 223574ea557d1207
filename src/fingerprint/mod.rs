//! Change-detection fingerprints for local files.
//!
//! Two modes are supported, chosen per ingestion source:
//!
//! - [`FingerprintMode::Full`] streams the whole file through an MD5 digest.
//!   Content-exact, O(file size) per call. This is the default.
//! - [`FingerprintMode::Fast`] hashes only the modification time and inode
//!   number. O(1) per call, but a changed file can look unchanged when the
//!   filesystem does not keep inodes stable or mtimes monotonic.
//!
//! Identities from different modes are never comparable; see
//! [`FileIdentity::matches`].
//!
//! # Example
//!
//! ```no_run
//! use ingester_core::fingerprint::{FingerprintMode, fingerprint};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let before = fingerprint(Path::new("notes.md"), FingerprintMode::Full).await?;
//! let after = fingerprint(Path::new("notes.md"), FingerprintMode::Full).await?;
//! assert!(before.matches(&after)?);
//! # Ok(())
//! # }
//! ```

mod error;
mod store;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::digest::{content_digest, file_digest};

pub use error::FingerprintError;
pub use store::{IdentityStatus, IdentityStore};

/// How a local file's identity is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// Hash of the full file content.
    #[default]
    Full,
    /// Hash of modification time and inode.
    Fast,
}

impl FingerprintMode {
    /// Returns the stable string label used in storage and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Fast => "fast",
        }
    }
}

impl fmt::Display for FingerprintMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FingerprintMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "full" => Ok(Self::Full),
            "fast" => Ok(Self::Fast),
            other => Err(format!("unknown fingerprint mode: {other}")),
        }
    }
}

/// Identity of a local file as observed during one ingestion pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    /// Path the identity was computed for.
    pub source_path: PathBuf,
    /// File size at observation time.
    pub size_bytes: u64,
    /// Last modification time.
    pub modified_time: SystemTime,
    /// Inode number where the platform exposes one.
    pub inode: Option<u64>,
    /// Content digest; present only for [`FingerprintMode::Full`].
    pub content_hash: Option<String>,
    mode: FingerprintMode,
    digest: String,
}

impl FileIdentity {
    /// Assembles an identity from already-known parts, deriving the digest.
    ///
    /// Used when rehydrating identities recorded by a previous run.
    #[must_use]
    pub fn from_parts(
        source_path: PathBuf,
        mode: FingerprintMode,
        size_bytes: u64,
        modified_time: SystemTime,
        inode: Option<u64>,
        content_hash: Option<String>,
    ) -> Self {
        let digest = match mode {
            FingerprintMode::Full => content_hash.clone().unwrap_or_default(),
            FingerprintMode::Fast => metadata_digest(modified_time, inode),
        };
        Self {
            source_path,
            size_bytes,
            modified_time,
            inode,
            content_hash,
            mode,
            digest,
        }
    }

    /// The mode this identity was produced under.
    #[must_use]
    pub fn mode(&self) -> FingerprintMode {
        self.mode
    }

    /// The mode-relevant hash: the content hash in full mode, the
    /// metadata hash in fast mode.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Modification time as nanoseconds since the Unix epoch (0 for earlier times).
    #[must_use]
    pub fn modified_ns(&self) -> i64 {
        system_time_to_ns(self.modified_time)
    }

    /// Compares two identities using only the fields meaningful to their mode.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError::ModeMismatch`] if the identities were
    /// produced under different modes.
    pub fn matches(&self, other: &Self) -> Result<bool, FingerprintError> {
        if self.mode != other.mode {
            return Err(FingerprintError::ModeMismatch {
                left: self.mode,
                right: other.mode,
            });
        }
        Ok(match self.mode {
            FingerprintMode::Full => {
                self.content_hash.is_some() && self.content_hash == other.content_hash
            }
            FingerprintMode::Fast => {
                self.modified_time == other.modified_time && self.inode == other.inode
            }
        })
    }
}

/// Computes the identity of the file at `path`.
///
/// # Errors
///
/// Returns [`FingerprintError::Io`] if the file cannot be stat'ed or read.
#[instrument(skip(path), fields(path = %path.display(), mode = %mode))]
pub async fn fingerprint(path: &Path, mode: FingerprintMode) -> Result<FileIdentity, FingerprintError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| FingerprintError::io(path, e))?;
    if metadata.is_dir() {
        return Err(FingerprintError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path is a directory"),
        ));
    }

    let modified_time = metadata
        .modified()
        .map_err(|e| FingerprintError::io(path, e))?;
    let inode = inode_of(&metadata);

    let content_hash = match mode {
        FingerprintMode::Full => Some(
            file_digest(path)
                .await
                .map_err(|e| FingerprintError::io(path, e))?,
        ),
        FingerprintMode::Fast => None,
    };

    let identity = FileIdentity::from_parts(
        path.to_path_buf(),
        mode,
        metadata.len(),
        modified_time,
        inode,
        content_hash,
    );
    debug!(digest = %identity.digest(), size = identity.size_bytes, "fingerprint computed");
    Ok(identity)
}

fn metadata_digest(modified_time: SystemTime, inode: Option<u64>) -> String {
    let inode = inode.map_or_else(|| "-".to_string(), |value| value.to_string());
    content_digest(format!("{}:{inode}", system_time_to_ns(modified_time)).as_bytes())
}

pub(crate) fn system_time_to_ns(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

pub(crate) fn ns_to_system_time(ns: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(u64::try_from(ns).unwrap_or(0))
}

#[cfg(unix)]
fn inode_of(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn inode_of(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}
