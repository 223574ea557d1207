//! Hand-off of produced file records to the downstream store.
//!
//! The engine never reaches into ambient state to create records: every
//! component that needs to emit, locate the cache directory or mint ids is
//! handed a [`NodeEmitter`].

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The artifact produced for every ingested file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Identifier minted by [`NodeEmitter::next_id`].
    pub id: String,
    pub absolute_path: PathBuf,
    /// File name without extension.
    pub name: String,
    /// Extension without the leading dot; empty when there is none.
    pub extension: String,
    pub size_bytes: u64,
    /// Full-mode content hash, or the metadata digest for fast-mode local files.
    pub hash: String,
    pub source_instance_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_node_id: Option<String>,
    /// Origin URL for fetched files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Errors reported by an emitter.
#[derive(Debug, Error)]
pub enum EmitError {
    /// The downstream store refused the record.
    #[error("record {id} rejected: {reason}")]
    Rejected {
        /// Id of the refused record.
        id: String,
        /// Why it was refused.
        reason: String,
    },

    /// Writing the record out failed.
    #[error("failed to write record: {0}")]
    Io(#[from] std::io::Error),

    /// The record could not be serialized.
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Capabilities the ingestion engine needs from the downstream store.
#[async_trait]
pub trait NodeEmitter: Send + Sync {
    /// Takes ownership of one record.
    async fn emit(&self, record: FileRecord) -> Result<(), EmitError>;

    /// Directory the content cache should live in.
    fn resolve_cache_dir(&self) -> PathBuf;

    /// A fresh record id.
    fn next_id(&self) -> String;
}

/// Keeps emitted records in memory. Used by tests and embedders that
/// post-process records themselves.
#[derive(Debug)]
pub struct MemoryEmitter {
    cache_dir: PathBuf,
    records: Mutex<Vec<FileRecord>>,
    ids: AtomicU64,
}

impl MemoryEmitter {
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            records: Mutex::new(Vec::new()),
            ids: AtomicU64::new(0),
        }
    }

    /// Snapshot of everything emitted so far, in emission order.
    #[must_use]
    pub fn records(&self) -> Vec<FileRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NodeEmitter for MemoryEmitter {
    async fn emit(&self, record: FileRecord) -> Result<(), EmitError> {
        let mut records = self.records.lock().map_err(|_| EmitError::Rejected {
            id: record.id.clone(),
            reason: "record buffer poisoned".to_string(),
        })?;
        records.push(record);
        Ok(())
    }

    fn resolve_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone()
    }

    fn next_id(&self) -> String {
        format!("file-{}", self.ids.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Writes each record as one JSON line.
pub struct JsonLinesEmitter<W> {
    cache_dir: PathBuf,
    writer: Mutex<W>,
    run_id: String,
    ids: AtomicU64,
}

impl<W: Write + Send> JsonLinesEmitter<W> {
    pub fn new(cache_dir: &Path, writer: W) -> Self {
        let started = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Self {
            cache_dir: cache_dir.to_path_buf(),
            writer: Mutex::new(writer),
            run_id: format!("{started:x}"),
            ids: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl<W: Write + Send> NodeEmitter for JsonLinesEmitter<W> {
    async fn emit(&self, record: FileRecord) -> Result<(), EmitError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().map_err(|_| EmitError::Rejected {
            id: record.id.clone(),
            reason: "output writer poisoned".to_string(),
        })?;
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }

    fn resolve_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone()
    }

    fn next_id(&self) -> String {
        format!(
            "{}-{}",
            self.run_id,
            self.ids.fetch_add(1, Ordering::SeqCst) + 1
        )
    }
}
