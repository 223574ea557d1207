//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use ingester_core::EngineSettings;

/// Ingest local files, remote URLs and buffers into a content-addressed cache.
///
/// Every produced record is printed to stdout as one JSON line. Logs go to
/// stderr.
#[derive(Parser, Debug)]
#[command(name = "ingester")]
#[command(author, version, about)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Cache directory holding cached files and the index database
    #[arg(long, default_value = ".ingest-cache", global = true)]
    pub cache_dir: PathBuf,

    /// Maximum simultaneous in-flight fetches (1-1000) [env: INGEST_CONCURRENT_DOWNLOAD]
    #[arg(short = 'c', long, global = true, value_parser = clap::value_parser!(u16).range(1..=1000))]
    pub concurrency: Option<u16>,

    /// Attempts per resource including the first (1-10) [env: INGEST_STALL_RETRY_LIMIT]
    #[arg(short = 'r', long, global = true, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_retries: Option<u32>,

    /// Longest gap between received chunks before an attempt is abandoned [env: INGEST_STALL_TIMEOUT]
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..=3_600_000))]
    pub stall_timeout_ms: Option<u64>,

    /// Longest wait for response headers [env: INGEST_CONNECTION_TIMEOUT]
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..=3_600_000))]
    pub connection_timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fingerprint local files and emit records for new or changed ones
    Local {
        /// Compare modification time and inode instead of hashing content
        #[arg(long)]
        fast: bool,

        /// Source instance name recorded on every record
        #[arg(long, default_value = "local")]
        source: String,

        /// Forget recorded files of this source that are not listed
        #[arg(long)]
        prune: bool,

        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Fetch remote files through the cache
    Remote {
        /// File name to store under, instead of the one derived from the URL
        #[arg(long)]
        name: Option<String>,

        /// Extension to store under
        #[arg(long)]
        ext: Option<String>,

        /// Extra request header as `Name: value`; repeatable
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Basic-auth user name
        #[arg(long)]
        user: Option<String>,

        /// Basic-auth password
        #[arg(long, requires = "user")]
        password: Option<String>,

        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Store a file's bytes (or stdin) in the cache by content hash
    Buffer {
        /// File name to store under; defaults to the content hash
        #[arg(long)]
        name: Option<String>,

        /// Extension to store under
        #[arg(long)]
        ext: Option<String>,

        /// Input file, or `-` for stdin
        #[arg(default_value = "-")]
        input: PathBuf,
    },
}

impl Args {
    /// Layers explicit flags over `base`, usually the environment settings.
    #[must_use]
    pub fn engine_settings(&self, base: EngineSettings) -> EngineSettings {
        EngineSettings {
            concurrency: self
                .concurrency
                .map_or(base.concurrency, usize::from),
            connection_timeout: self
                .connection_timeout_ms
                .map_or(base.connection_timeout, Duration::from_millis),
            stall_timeout: self
                .stall_timeout_ms
                .map_or(base.stall_timeout, Duration::from_millis),
            max_attempts: self.max_retries.unwrap_or(base.max_attempts),
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {raw:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
