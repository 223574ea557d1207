//! Ingestion facade wiring fingerprinting, caching, fetching and naming.
//!
//! An [`Ingestor`] owns its cache, coordinator and identity store; nothing
//! is process-global, so several ingestors over different cache
//! directories can coexist.
//!
//! - Local files are fingerprinted and compared with the identity recorded
//!   by the previous run. Only new or changed files produce a record.
//! - Remote URLs and in-memory buffers go through the content cache. A hit
//!   reuses the cached path without any network IO.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ingester_core::config::EngineSettings;
//! use ingester_core::emitter::MemoryEmitter;
//! use ingester_core::ingest::{Ingestor, RemoteFileRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let emitter = Arc::new(MemoryEmitter::new(".ingest-cache"));
//! let ingestor = Ingestor::open(&EngineSettings::default(), emitter.clone()).await?;
//! let record = ingestor
//!     .ingest_remote(&RemoteFileRequest::new("https://example.com/logo.png"))
//!     .await?;
//! println!("{} -> {}", record.id, record.absolute_path.display());
//! ingestor.close().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheEntry, CacheKey, ContentCache, StagedFile};
use crate::config::EngineSettings;
use crate::db::Database;
use crate::download::{
    BasicAuth, DownloadCoordinator, FetchRequest, HttpClient, RetryPolicy, SNIFF_LEN,
};
use crate::emitter::{FileRecord, NodeEmitter};
use crate::fingerprint::{FileIdentity, FingerprintMode, IdentityStore, fingerprint};
use crate::naming::{NameHints, resolve_name};

pub use error::IngestError;
pub use report::{IngestReport, ItemOutcome, ItemReport};

/// Source instance name given to remote and buffer records by default.
pub const PROGRAMMATIC_SOURCE: &str = "__programmatic__";

/// File name of the index database inside the cache directory.
pub const INDEX_FILE_NAME: &str = "index.sqlite";

/// Local files fingerprinted at once by a batch.
const LOCAL_BATCH_CONCURRENCY: usize = 16;

/// A local ingestion source: its instance name and fingerprint mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSource {
    pub instance_name: String,
    pub mode: FingerprintMode,
}

impl LocalSource {
    #[must_use]
    pub fn new(instance_name: impl Into<String>, mode: FingerprintMode) -> Self {
        Self {
            instance_name: instance_name.into(),
            mode,
        }
    }
}

/// Result of ingesting one local file.
#[derive(Debug, Clone)]
pub enum LocalOutcome {
    /// New or changed since the previous run; a record was emitted.
    Changed(FileRecord),
    /// Same identity as the previous run; nothing emitted.
    Unchanged(FileIdentity),
}

/// One remote resource to ingest.
#[derive(Debug, Clone, Default)]
pub struct RemoteFileRequest {
    pub url: String,
    /// Overrides the name derived from the URL and response.
    pub name: Option<String>,
    /// Overrides the derived extension.
    pub ext: Option<String>,
    pub auth: Option<BasicAuth>,
    /// Sent unmodified with every attempt for this resource.
    pub headers: Vec<(String, String)>,
    pub parent_node_id: Option<String>,
    /// Defaults to [`PROGRAMMATIC_SOURCE`].
    pub source_instance_name: Option<String>,
}

impl RemoteFileRequest {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_ext(mut self, ext: impl Into<String>) -> Self {
        self.ext = Some(ext.into());
        self
    }

    #[must_use]
    pub fn with_auth(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.auth = Some(BasicAuth {
            username: username.into(),
            password,
        });
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent_node_id: impl Into<String>) -> Self {
        self.parent_node_id = Some(parent_node_id.into());
        self
    }

    fn fetch_request(&self) -> FetchRequest {
        FetchRequest {
            url: self.url.clone(),
            auth: self.auth.clone(),
            headers: self.headers.clone(),
        }
    }
}

/// In-memory content to ingest as a file.
#[derive(Debug, Clone, Default)]
pub struct BufferRequest {
    pub content: Vec<u8>,
    /// Defaults to the content hash.
    pub name: Option<String>,
    /// Defaults to whatever the content's magic bytes suggest.
    pub ext: Option<String>,
    pub parent_node_id: Option<String>,
    pub source_instance_name: Option<String>,
}

impl BufferRequest {
    #[must_use]
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_ext(mut self, ext: impl Into<String>) -> Self {
        self.ext = Some(ext.into());
        self
    }
}

/// Owns every piece of ingestion state for one cache directory.
pub struct Ingestor {
    emitter: Arc<dyn NodeEmitter>,
    db: Database,
    cache: ContentCache,
    coordinator: DownloadCoordinator,
    identities: IdentityStore,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("cache_root", &self.cache.root())
            .field("concurrency", &self.coordinator.concurrency())
            .finish_non_exhaustive()
    }
}

impl Ingestor {
    /// Opens an ingestor over `emitter.resolve_cache_dir()`.
    ///
    /// Creates the cache directory and index if needed and removes partial
    /// files left by an interrupted run.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Config`] for out-of-range settings, or the
    /// database, cache or client error that prevented startup.
    pub async fn open(
        settings: &EngineSettings,
        emitter: Arc<dyn NodeEmitter>,
    ) -> Result<Self, IngestError> {
        let policy = RetryPolicy::with_max_attempts(settings.max_attempts);
        Self::open_with_policy(settings, emitter, policy).await
    }

    /// Like [`Ingestor::open`] with an explicit retry policy.
    ///
    /// # Errors
    ///
    /// See [`Ingestor::open`].
    #[instrument(skip_all)]
    pub async fn open_with_policy(
        settings: &EngineSettings,
        emitter: Arc<dyn NodeEmitter>,
        policy: RetryPolicy,
    ) -> Result<Self, IngestError> {
        settings.validate()?;

        let cache_dir = emitter.resolve_cache_dir();
        tokio::fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| IngestError::io(&cache_dir, e))?;
        let db = Database::new(&cache_dir.join(INDEX_FILE_NAME)).await?;
        let cache = ContentCache::open(&cache_dir, db.clone()).await?;
        let coordinator = DownloadCoordinator::new(settings, policy, HttpClient::new()?);
        let identities = IdentityStore::new(db.clone());

        info!(
            cache_dir = %cache.root().display(),
            concurrency = settings.concurrency,
            max_attempts = settings.max_attempts,
            "ingestor ready"
        );

        Ok(Self {
            emitter,
            db,
            cache,
            coordinator,
            identities,
        })
    }

    #[must_use]
    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    #[must_use]
    pub fn coordinator(&self) -> &DownloadCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn identities(&self) -> &IdentityStore {
        &self.identities
    }

    /// Ingests one local file.
    ///
    /// The new identity is recorded only after the record has been emitted,
    /// so a failed emit is retried by the next run.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Fingerprint`] if the file is unreadable, or the
    /// emitter/store error that stopped the record.
    #[instrument(skip(self, source), fields(source = %source.instance_name, path = %path.display()))]
    pub async fn ingest_local(
        &self,
        source: &LocalSource,
        path: &Path,
    ) -> Result<LocalOutcome, IngestError> {
        let absolute_path = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| IngestError::io(path, e))?;
        let identity = fingerprint(&absolute_path, source.mode).await?;

        let status = self
            .identities
            .status(&source.instance_name, &identity)
            .await?;
        if !status.needs_recompute() {
            debug!("unchanged since previous run");
            return Ok(LocalOutcome::Unchanged(identity));
        }

        let (name, extension) = split_file_name(&absolute_path);
        let record = FileRecord {
            id: self.emitter.next_id(),
            absolute_path,
            name,
            extension,
            size_bytes: identity.size_bytes,
            hash: identity.digest().to_string(),
            source_instance_name: source.instance_name.clone(),
            parent_node_id: None,
            url: None,
        };
        self.emitter.emit(record.clone()).await?;
        self.identities
            .record(&source.instance_name, &identity)
            .await?;

        info!(?status, id = %record.id, "ingested local file");
        Ok(LocalOutcome::Changed(record))
    }

    /// Ingests many local files; one failure never stops the others.
    pub async fn ingest_local_batch(&self, source: &LocalSource, paths: &[PathBuf]) -> IngestReport {
        let outcomes: Vec<_> = futures_util::stream::iter(paths)
            .map(|path| async move { (path, self.ingest_local(source, path).await) })
            .buffered(LOCAL_BATCH_CONCURRENCY)
            .collect()
            .await;

        let mut report = IngestReport::default();
        for (path, outcome) in outcomes {
            let target = path.display().to_string();
            report.push(match outcome {
                Ok(LocalOutcome::Changed(record)) => ItemReport {
                    target,
                    outcome: ItemOutcome::Emitted { record },
                },
                Ok(LocalOutcome::Unchanged(_)) => ItemReport {
                    target,
                    outcome: ItemOutcome::Unchanged,
                },
                Err(error) => {
                    warn!(path = %target, reason = error.reason(), error = %error, "local ingest failed");
                    ItemReport::failed(target, &error)
                }
            });
        }
        report
    }

    /// Forgets identities recorded under `source` for paths not in `seen`.
    ///
    /// Call after a full scan so deleted files do not linger. Returns how
    /// many paths were forgotten.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Fingerprint`] if the identity store fails.
    pub async fn prune_local(
        &self,
        source: &LocalSource,
        seen: &[PathBuf],
    ) -> Result<u64, IngestError> {
        let mut absolute = Vec::with_capacity(seen.len());
        for path in seen {
            // Vanished paths can only be forgotten.
            if let Ok(path) = tokio::fs::canonicalize(path).await {
                absolute.push(path);
            }
        }
        let removed = self
            .identities
            .retain(&source.instance_name, &absolute)
            .await?;
        if removed > 0 {
            info!(source = %source.instance_name, removed, "forgot vanished files");
        }
        Ok(removed)
    }

    /// Fetches (or reuses) one remote resource and emits its record.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Download`] with the final failure once retries
    /// are spent or a permanent error occurs, [`IngestError::Cache`] for an
    /// unparsable URL or cache IO failure, or [`IngestError::Emit`].
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn ingest_remote(&self, request: &RemoteFileRequest) -> Result<FileRecord, IngestError> {
        let key = CacheKey::for_url(&request.url)?;
        let digest = key.as_str();
        let fetch_request = request.fetch_request();

        let outcome = self
            .cache
            .get_or_insert_with(&key, |temp_path| async move {
                let fetched = self.coordinator.fetch(&fetch_request, &temp_path).await?;
                let name = resolve_name(&NameHints {
                    url: Some(&request.url),
                    content_type: fetched.content_type.as_deref(),
                    content_disposition: fetched.content_disposition.as_deref(),
                    explicit_name: request.name.as_deref(),
                    explicit_ext: request.ext.as_deref(),
                    head: &fetched.head,
                    fallback: digest,
                });
                Ok::<_, IngestError>(StagedFile {
                    temp_path: fetched.temp_path,
                    name,
                    size_bytes: fetched.size_bytes,
                    content_hash: fetched.content_hash,
                })
            })
            .await?;

        let cached = outcome.is_hit();
        let record = self.record_for(
            outcome.into_entry(),
            request.source_instance_name.as_deref(),
            request.parent_node_id.clone(),
            Some(request.url.clone()),
        );
        self.emitter.emit(record.clone()).await?;
        info!(cached, id = %record.id, path = %record.absolute_path.display(), "ingested remote file");
        Ok(record)
    }

    /// Ingests many remote resources concurrently.
    ///
    /// The coordinator's ceiling bounds network concurrency; each URL gets
    /// its own outcome and a failure never aborts the rest.
    pub async fn ingest_remote_batch(&self, requests: &[RemoteFileRequest]) -> IngestReport {
        let outcomes =
            futures_util::future::join_all(requests.iter().map(|request| self.ingest_remote(request)))
                .await;

        let mut report = IngestReport::default();
        for (request, outcome) in requests.iter().zip(outcomes) {
            report.push(match outcome {
                Ok(record) => ItemReport {
                    target: request.url.clone(),
                    outcome: ItemOutcome::Emitted { record },
                },
                Err(error) => {
                    warn!(url = %request.url, reason = error.reason(), error = %error, "remote ingest failed");
                    ItemReport::failed(request.url.clone(), &error)
                }
            });
        }
        report
    }

    /// Stores an in-memory buffer in the cache and emits its record.
    ///
    /// The content hash is the cache key. Re-ingesting identical bytes
    /// reuses the existing file, including the name it was first stored
    /// under.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] if the buffer cannot be staged, or the
    /// cache/emitter error that stopped the record.
    #[instrument(skip(self, request), fields(bytes = request.content.len()))]
    pub async fn ingest_buffer(&self, request: &BufferRequest) -> Result<FileRecord, IngestError> {
        let key = CacheKey::for_content(&request.content);
        let digest = key.as_str();

        let outcome = self
            .cache
            .get_or_insert_with(&key, |temp_path| async move {
                tokio::fs::write(&temp_path, &request.content)
                    .await
                    .map_err(|e| IngestError::io(&temp_path, e))?;
                let head = &request.content[..request.content.len().min(SNIFF_LEN)];
                let name = resolve_name(&NameHints {
                    explicit_name: request.name.as_deref(),
                    explicit_ext: request.ext.as_deref(),
                    head,
                    fallback: digest,
                    ..NameHints::default()
                });
                Ok::<_, IngestError>(StagedFile {
                    temp_path,
                    name,
                    size_bytes: request.content.len() as u64,
                    content_hash: digest.to_string(),
                })
            })
            .await?;

        let cached = outcome.is_hit();
        let record = self.record_for(
            outcome.into_entry(),
            request.source_instance_name.as_deref(),
            request.parent_node_id.clone(),
            None,
        );
        self.emitter.emit(record.clone()).await?;
        info!(cached, id = %record.id, "ingested buffer");
        Ok(record)
    }

    /// Stops accepting fetches and closes the index database.
    pub async fn close(self) {
        self.coordinator.close();
        self.db.close().await;
    }

    fn record_for(
        &self,
        entry: CacheEntry,
        source_instance_name: Option<&str>,
        parent_node_id: Option<String>,
        url: Option<String>,
    ) -> FileRecord {
        FileRecord {
            id: self.emitter.next_id(),
            absolute_path: entry.local_path,
            extension: entry.name.ext.trim_start_matches('.').to_string(),
            name: entry.name.name,
            size_bytes: entry.size_bytes,
            hash: entry.content_hash,
            source_instance_name: source_instance_name
                .unwrap_or(PROGRAMMATIC_SOURCE)
                .to_string(),
            parent_node_id,
            url,
        }
    }
}

/// Splits a local path's file name into stem and dot-less extension.
fn split_file_name(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default();
    (stem, extension)
}
