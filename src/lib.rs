//! Ingester Core Library
//!
//! Ingests local files, remote URLs and in-memory buffers into a
//! content-addressed on-disk cache and hands one [`FileRecord`] per file to
//! a downstream [`NodeEmitter`], skipping redundant disk IO, network fetches
//! and hashing across runs.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`fingerprint`] - Local file identity (content hash or cheap metadata hash)
//! - [`cache`] - Content-addressed store keyed by URL or content hash
//! - [`download`] - Bounded-concurrency fetching with timeouts and retries
//! - [`naming`] - Safe, collision-free filenames for fetched content
//! - [`emitter`] - The downstream hand-off interface
//! - [`ingest`] - The [`Ingestor`] facade tying the above together
//! - [`config`] - Engine settings from the environment
//! - [`db`] - Database connection and schema management

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod db;
pub mod digest;
pub mod download;
pub mod emitter;
pub mod fingerprint;
pub mod ingest;
pub mod naming;
#[cfg(test)]
pub mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use cache::{CacheEntry, CacheError, CacheKey, ContentCache};
pub use config::{ConfigError, EngineSettings};
pub use db::{Database, DbError};
pub use download::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DownloadCoordinator, DownloadError, FailureReason,
    HttpClient, RetryPolicy,
};
pub use emitter::{FileRecord, JsonLinesEmitter, MemoryEmitter, NodeEmitter};
pub use fingerprint::{FileIdentity, FingerprintMode, fingerprint};
pub use ingest::{
    BufferRequest, IngestError, IngestReport, Ingestor, LocalOutcome, LocalSource,
    RemoteFileRequest,
};
