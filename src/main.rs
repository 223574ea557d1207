//! CLI entry point for the ingester tool.

use std::io::{self, Read};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ingester_core::download::BasicAuth;
use ingester_core::{
    BufferRequest, EngineSettings, FingerprintMode, IngestReport, Ingestor, JsonLinesEmitter,
    LocalSource, RemoteFileRequest,
};
use tracing::{debug, info};

mod cli;

use cli::{Args, Command};

/// Exit code when some, but not necessarily all, items failed.
const PARTIAL_FAILURE_EXIT: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // stdout carries the JSON lines records.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let settings = args.engine_settings(
        EngineSettings::from_env().context("invalid INGEST_* environment configuration")?,
    );
    let emitter = Arc::new(JsonLinesEmitter::new(&args.cache_dir, io::stdout()));
    let ingestor = Ingestor::open(&settings, emitter)
        .await
        .with_context(|| format!("failed to open cache at {}", args.cache_dir.display()))?;

    let report = match args.command {
        Command::Local {
            fast,
            source,
            prune,
            paths,
        } => {
            let mode = if fast {
                FingerprintMode::Fast
            } else {
                FingerprintMode::Full
            };
            let source = LocalSource::new(source, mode);
            let report = ingestor.ingest_local_batch(&source, &paths).await;
            if prune {
                ingestor.prune_local(&source, &paths).await?;
            }
            report
        }
        Command::Remote {
            name,
            ext,
            headers,
            user,
            password,
            urls,
        } => {
            let requests: Vec<_> = urls
                .into_iter()
                .map(|url| RemoteFileRequest {
                    url,
                    name: name.clone(),
                    ext: ext.clone(),
                    auth: user.clone().map(|username| BasicAuth {
                        username,
                        password: password.clone(),
                    }),
                    headers: headers.clone(),
                    ..RemoteFileRequest::default()
                })
                .collect();
            ingestor.ingest_remote_batch(&requests).await
        }
        Command::Buffer { name, ext, input } => {
            let content = read_input(&input)?;
            let request = BufferRequest {
                content,
                name,
                ext,
                ..BufferRequest::default()
            };
            let record = ingestor.ingest_buffer(&request).await?;
            debug!(path = %record.absolute_path.display(), "buffer stored");
            ingestor.close().await;
            return Ok(ExitCode::SUCCESS);
        }
    };

    ingestor.close().await;
    Ok(exit_code(&report))
}

fn read_input(input: &Path) -> Result<Vec<u8>> {
    if input == Path::new("-") {
        let mut content = Vec::new();
        io::stdin()
            .read_to_end(&mut content)
            .context("failed to read stdin")?;
        Ok(content)
    } else {
        std::fs::read(input).with_context(|| format!("failed to read {}", input.display()))
    }
}

fn exit_code(report: &IngestReport) -> ExitCode {
    info!(
        emitted = report.emitted(),
        unchanged = report.unchanged(),
        failed = report.failed(),
        total = report.items().len(),
        "Ingest complete"
    );
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(PARTIAL_FAILURE_EXIT)
    }
}
