//! Content-addressed on-disk cache for fetched and buffered files.
//!
//! Entries live at `<root>/<key kind>/<key digest>/<name><ext>`; the
//! key → path index is kept in the `cache_entries` table. Content is always staged in
//! `<root>/.tmp/` first and only renamed into place once complete, so a
//! lookup never observes a partial file.
//!
//! [`ContentCache::get_or_insert_with`] is the single-flight entry point: at
//! most one caller per key runs the staging closure, later callers for the
//! same key wait for it and then see the hit, or the same failure if it
//! failed. Different keys never contend.
//!
//! # Example
//!
//! ```no_run
//! use ingester_core::cache::{CacheKey, ContentCache};
//! use ingester_core::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let root = Path::new(".ingest-cache");
//! let db = Database::new(&root.join("index.sqlite")).await?;
//! let cache = ContentCache::open(root, db).await?;
//! let key = CacheKey::for_url("https://example.com/logo.png")?;
//! if let Some(entry) = cache.lookup(&key).await? {
//!     println!("cached at {}", entry.local_path.display());
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod key;

use std::any::Any;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::db::Database;
use crate::naming::ResolvedName;

pub use error::CacheError;
pub use key::{CacheKey, KeyKind};

/// Directory under the cache root that holds in-progress files.
const TEMP_DIR_NAME: &str = ".tmp";
/// Suffix of staged files.
const TEMP_SUFFIX: &str = "part";

/// Failure of a flight, kept for the callers queued on the same key.
type SharedFailure = Arc<dyn Any + Send + Sync>;
/// Per-key slot: holding the lock means owning the flight.
type FlightSlot = Arc<Mutex<Option<SharedFailure>>>;

/// A trusted cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub local_path: PathBuf,
    /// Name the file was stored under; `local_path` ends in `name.file_name()`.
    pub name: ResolvedName,
    pub size_bytes: u64,
    pub content_hash: String,
    pub created_at: String,
}

/// A complete file sitting in the staging area, ready to be promoted.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub temp_path: PathBuf,
    pub name: ResolvedName,
    pub size_bytes: u64,
    pub content_hash: String,
}

/// Result of [`ContentCache::get_or_insert_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    /// A valid entry already existed; nothing was staged.
    Hit(CacheEntry),
    /// The staging closure ran and its file was promoted.
    Inserted(CacheEntry),
}

impl CacheOutcome {
    #[must_use]
    pub fn entry(&self) -> &CacheEntry {
        match self {
            Self::Hit(entry) | Self::Inserted(entry) => entry,
        }
    }

    #[must_use]
    pub fn into_entry(self) -> CacheEntry {
        match self {
            Self::Hit(entry) | Self::Inserted(entry) => entry,
        }
    }

    #[must_use]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Counters describing cache activity since the cache was opened.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::SeqCst)
    }

    /// Files actually promoted into the store.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Entries dropped because their backing file vanished or changed size.
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::SeqCst)
    }
}

/// Directory-backed, content-addressed store.
#[derive(Debug)]
pub struct ContentCache {
    root: PathBuf,
    temp_dir: PathBuf,
    db: Database,
    locks: DashMap<String, FlightSlot>,
    temp_counter: AtomicU64,
    stats: CacheStats,
}

impl ContentCache {
    /// Opens the cache rooted at `root`, creating it if needed.
    ///
    /// Staged files left behind by an interrupted run are deleted.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the directories cannot be created or swept.
    #[instrument(skip(root, db), fields(root = %root.display()))]
    pub async fn open(root: &Path, db: Database) -> Result<Self, CacheError> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| CacheError::io(root, e))?;
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| CacheError::io(root, e))?;
        let temp_dir = root.join(TEMP_DIR_NAME);
        tokio::fs::create_dir_all(&temp_dir)
            .await
            .map_err(|e| CacheError::io(&temp_dir, e))?;

        let swept = sweep_temp_dir(&temp_dir).await?;
        if swept > 0 {
            info!(swept, "removed stale partial files");
        }

        Ok(Self {
            root,
            temp_dir,
            db,
            locks: DashMap::new(),
            temp_counter: AtomicU64::new(0),
            stats: CacheStats::default(),
        })
    }

    /// The absolute cache root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Where an entry named `name` for `key` lives once promoted.
    #[must_use]
    pub fn entry_path(&self, key: &CacheKey, name: &ResolvedName) -> PathBuf {
        self.entry_dir(key).join(name.file_name())
    }

    /// URL and content digests share one hex space, so the kind is part of the path.
    fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.kind().as_str()).join(key.as_str())
    }

    /// A fresh staging path for `key`, unique within this process.
    #[must_use]
    pub fn temp_path_for(&self, key: &CacheKey) -> PathBuf {
        let sequence = self.temp_counter.fetch_add(1, Ordering::SeqCst);
        self.temp_dir.join(format!(
            "{}-{}-{sequence}.{TEMP_SUFFIX}",
            key.as_str(),
            std::process::id()
        ))
    }

    /// Returns the entry for `key` if it is still backed by an intact file.
    ///
    /// An entry whose file is missing or whose size differs from the
    /// recorded size is evicted and reported as absent.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Database`] if the index cannot be queried, or
    /// [`CacheError::Io`] if the backing file cannot be stat'ed for a reason
    /// other than being missing.
    pub async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let row = sqlx::query(
            "SELECT local_path, file_stem, file_ext, size_bytes, content_hash, created_at
             FROM cache_entries WHERE key = ?",
        )
        .bind(key.to_string())
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let local_path = PathBuf::from(row.get::<String, _>("local_path"));
        let size_bytes = u64::try_from(row.get::<i64, _>("size_bytes")).unwrap_or(0);
        let entry = CacheEntry {
            key: key.clone(),
            local_path,
            name: ResolvedName {
                name: row.get("file_stem"),
                ext: row.get("file_ext"),
            },
            size_bytes,
            content_hash: row.get("content_hash"),
            created_at: row.get("created_at"),
        };

        let problem = match tokio::fs::metadata(&entry.local_path).await {
            Ok(metadata) if metadata.is_file() && metadata.len() == entry.size_bytes => None,
            Ok(metadata) if metadata.is_file() => Some(format!(
                "size mismatch: recorded {} bytes, found {}",
                entry.size_bytes,
                metadata.len()
            )),
            Ok(_) => Some("backing path is not a file".to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Some("backing file missing".to_string())
            }
            Err(e) => return Err(CacheError::io(&entry.local_path, e)),
        };

        match problem {
            None => Ok(Some(entry)),
            Some(reason) => {
                let error = CacheError::corruption(key.to_string(), reason);
                warn!(error = %error, path = %entry.local_path.display(), "evicting cache entry");
                self.evict(&entry).await?;
                Ok(None)
            }
        }
    }

    /// Promotes `staged` into the store under `key`.
    ///
    /// If `key` already has a valid entry the staged file is discarded and
    /// the existing entry returned; no write happens.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the file cannot be moved into place, or
    /// [`CacheError::Database`] if the index cannot be updated.
    pub async fn insert(&self, key: &CacheKey, staged: StagedFile) -> Result<CacheEntry, CacheError> {
        let lease = self.lease(key);
        let _guard = lease.lock.lock().await;
        self.insert_locked(key, staged).await
    }

    /// Returns the entry for `key`, running `stage` to produce it on a miss.
    ///
    /// `stage` receives a fresh temp path and must leave the complete content
    /// there. Concurrent calls for the same key run `stage` at most once; the
    /// others wait and observe the resulting entry as a hit. If `stage` fails
    /// its temp file is removed, nothing is recorded, and every caller that
    /// was waiting on the same key receives that same error. A call made once
    /// no caller is left on the key starts a fresh flight.
    ///
    /// # Errors
    ///
    /// Returns the error from `stage`, or a [`CacheError`] converted into `E`,
    /// shared between all callers of the failed flight.
    #[instrument(skip(self, key, stage), fields(key = %key))]
    pub async fn get_or_insert_with<F, Fut, E>(
        &self,
        key: &CacheKey,
        stage: F,
    ) -> Result<CacheOutcome, Arc<E>>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<StagedFile, E>>,
        E: From<CacheError> + Send + Sync + 'static,
    {
        let lease = self.lease(key);
        let mut flight = lease.lock.lock().await;

        let earlier = flight
            .as_ref()
            .and_then(|failure| Arc::clone(failure).downcast::<E>().ok());
        if let Some(error) = earlier {
            debug!("reusing failure of the flight this call waited on");
            return Err(error);
        }

        match self.fill(key, stage).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                let error = Arc::new(error);
                let shared: SharedFailure = error.clone();
                *flight = Some(shared);
                Err(error)
            }
        }
    }

    async fn fill<F, Fut, E>(&self, key: &CacheKey, stage: F) -> Result<CacheOutcome, E>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<StagedFile, E>>,
        E: From<CacheError>,
    {
        if let Some(entry) = self.lookup(key).await? {
            self.stats.hits.fetch_add(1, Ordering::SeqCst);
            debug!(path = %entry.local_path.display(), "cache hit");
            return Ok(CacheOutcome::Hit(entry));
        }
        self.stats.misses.fetch_add(1, Ordering::SeqCst);

        let temp_path = self.temp_path_for(key);
        let staged = match stage(temp_path.clone()).await {
            Ok(staged) => staged,
            Err(e) => {
                remove_if_exists(&temp_path).await;
                return Err(e);
            }
        };

        Ok(CacheOutcome::Inserted(self.insert_locked(key, staged).await?))
    }

    async fn insert_locked(
        &self,
        key: &CacheKey,
        staged: StagedFile,
    ) -> Result<CacheEntry, CacheError> {
        if let Some(existing) = self.lookup(key).await? {
            debug!(key = %key, "entry already present; discarding staged file");
            remove_if_exists(&staged.temp_path).await;
            return Ok(existing);
        }

        let entry_dir = self.entry_dir(key);
        tokio::fs::create_dir_all(&entry_dir)
            .await
            .map_err(|e| CacheError::io(&entry_dir, e))?;
        let local_path = self.entry_path(key, &staged.name);

        if let Err(e) = tokio::fs::rename(&staged.temp_path, &local_path).await {
            remove_if_exists(&staged.temp_path).await;
            return Err(CacheError::io(&local_path, e));
        }

        let created_at: String = sqlx::query_scalar(
            r"INSERT INTO cache_entries
                (key, kind, local_path, file_stem, file_ext, size_bytes, content_hash)
              VALUES (?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT (key) DO UPDATE SET
                local_path = excluded.local_path,
                file_stem = excluded.file_stem,
                file_ext = excluded.file_ext,
                size_bytes = excluded.size_bytes,
                content_hash = excluded.content_hash,
                created_at = datetime('now')
              RETURNING created_at",
        )
        .bind(key.to_string())
        .bind(key.kind().as_str())
        .bind(local_path.to_string_lossy().into_owned())
        .bind(&staged.name.name)
        .bind(&staged.name.ext)
        .bind(i64::try_from(staged.size_bytes).unwrap_or(i64::MAX))
        .bind(&staged.content_hash)
        .fetch_one(self.db.pool())
        .await?;

        self.stats.writes.fetch_add(1, Ordering::SeqCst);
        info!(path = %local_path.display(), bytes = staged.size_bytes, "cached");

        Ok(CacheEntry {
            key: key.clone(),
            local_path,
            name: staged.name,
            size_bytes: staged.size_bytes,
            content_hash: staged.content_hash,
            created_at,
        })
    }

    async fn evict(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(entry.key.to_string())
            .execute(self.db.pool())
            .await?;
        remove_if_exists(&entry.local_path).await;
        self.stats.evictions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn lease(&self, key: &CacheKey) -> KeyLease<'_> {
        let name = key.to_string();
        let lock = Arc::clone(
            self.locks
                .entry(name.clone())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .value(),
        );
        KeyLease {
            locks: &self.locks,
            name,
            lock,
        }
    }
}

/// Shared handle on one key's slot; drops the map slot once nobody else holds it.
struct KeyLease<'a> {
    locks: &'a DashMap<String, FlightSlot>,
    name: String,
    lock: FlightSlot,
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        // Two references: ours and the map's.
        self.locks.remove_if(&self.name, |_, held| {
            Arc::ptr_eq(held, &self.lock) && Arc::strong_count(held) == 2
        });
    }
}

async fn sweep_temp_dir(temp_dir: &Path) -> Result<usize, CacheError> {
    let mut entries = tokio::fs::read_dir(temp_dir)
        .await
        .map_err(|e| CacheError::io(temp_dir, e))?;
    let mut swept = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CacheError::io(temp_dir, e))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == TEMP_SUFFIX) {
            remove_if_exists(&path).await;
            swept += 1;
        }
    }
    Ok(swept)
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}
