//! Persistence of identities observed by the previous ingestion run.

use std::path::{Path, PathBuf};

use sqlx::Row;
use tracing::{debug, instrument};

use super::{FileIdentity, FingerprintError, FingerprintMode, ns_to_system_time};
use crate::db::Database;

/// How a freshly computed identity relates to the recorded one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStatus {
    /// Nothing recorded for this path yet.
    New,
    /// Recorded identity differs, or was produced under another mode.
    Changed,
    /// Recorded identity matches under the active mode.
    Unchanged,
}

impl IdentityStatus {
    /// Whether the file's representation must be recomputed.
    #[must_use]
    pub fn needs_recompute(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Identities recorded per `(source instance, path)`.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    db: Database,
}

impl IdentityStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Loads the identity recorded for `path` under `source_instance`.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError::Database`] if the query fails.
    pub async fn previous(
        &self,
        source_instance: &str,
        path: &Path,
    ) -> Result<Option<FileIdentity>, FingerprintError> {
        let row = sqlx::query(
            r"SELECT mode, size_bytes, modified_ns, inode, content_hash
              FROM file_identities
              WHERE source_instance = ? AND path = ?",
        )
        .bind(source_instance)
        .bind(path_key(path))
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mode: String = row.get("mode");
        let Ok(mode) = mode.parse::<FingerprintMode>() else {
            // Unknown mode from a newer schema: treat as absent.
            return Ok(None);
        };
        let size_bytes: i64 = row.get("size_bytes");
        let modified_ns: i64 = row.get("modified_ns");
        let inode: Option<i64> = row.get("inode");
        let content_hash: Option<String> = row.get("content_hash");

        Ok(Some(FileIdentity::from_parts(
            path.to_path_buf(),
            mode,
            u64::try_from(size_bytes).unwrap_or(0),
            ns_to_system_time(modified_ns),
            // Inode numbers are stored bit-for-bit in a signed column.
            inode.map(|value| value as u64),
            content_hash,
        )))
    }

    /// Compares `identity` with the recorded one.
    ///
    /// A recorded identity from a different mode never matches, so switching
    /// a source between modes forces every file to be recomputed once.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError::Database`] if the lookup fails.
    #[instrument(skip(self, identity), fields(path = %identity.source_path.display()))]
    pub async fn status(
        &self,
        source_instance: &str,
        identity: &FileIdentity,
    ) -> Result<IdentityStatus, FingerprintError> {
        let Some(previous) = self
            .previous(source_instance, &identity.source_path)
            .await?
        else {
            return Ok(IdentityStatus::New);
        };

        if previous.mode() != identity.mode() {
            debug!(
                previous = %previous.mode(),
                current = %identity.mode(),
                "fingerprint mode switched; invalidating recorded identity"
            );
            return Ok(IdentityStatus::Changed);
        }

        if previous.matches(identity)? {
            Ok(IdentityStatus::Unchanged)
        } else {
            Ok(IdentityStatus::Changed)
        }
    }

    /// Records `identity` as the latest observation for its path.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError::Database`] if the upsert fails.
    pub async fn record(
        &self,
        source_instance: &str,
        identity: &FileIdentity,
    ) -> Result<(), FingerprintError> {
        sqlx::query(
            r"INSERT INTO file_identities
                (source_instance, path, mode, digest, size_bytes, modified_ns, inode, content_hash)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT (source_instance, path) DO UPDATE SET
                mode = excluded.mode,
                digest = excluded.digest,
                size_bytes = excluded.size_bytes,
                modified_ns = excluded.modified_ns,
                inode = excluded.inode,
                content_hash = excluded.content_hash,
                updated_at = datetime('now')",
        )
        .bind(source_instance)
        .bind(path_key(&identity.source_path))
        .bind(identity.mode().as_str())
        .bind(identity.digest())
        .bind(i64::try_from(identity.size_bytes).unwrap_or(i64::MAX))
        .bind(identity.modified_ns())
        .bind(identity.inode.map(|value| value as i64))
        .bind(identity.content_hash.as_deref())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Drops recorded identities under `source_instance` whose path is not in `seen`.
    ///
    /// Returns the number of forgotten paths.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError::Database`] if a query fails.
    pub async fn retain(
        &self,
        source_instance: &str,
        seen: &[PathBuf],
    ) -> Result<u64, FingerprintError> {
        let recorded: Vec<String> =
            sqlx::query_scalar("SELECT path FROM file_identities WHERE source_instance = ?")
                .bind(source_instance)
                .fetch_all(self.db.pool())
                .await?;

        let seen: std::collections::HashSet<String> =
            seen.iter().map(|path| path_key(path)).collect();
        let mut removed = 0;
        for path in recorded.into_iter().filter(|path| !seen.contains(path)) {
            removed += sqlx::query(
                "DELETE FROM file_identities WHERE source_instance = ? AND path = ?",
            )
            .bind(source_instance)
            .bind(&path)
            .execute(self.db.pool())
            .await?
            .rows_affected();
        }
        Ok(removed)
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
