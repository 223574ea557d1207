//! Shared helpers for integration tests: fast engine settings, ingestors
//! over temp dirs, and raw TCP servers that misbehave on purpose.

#![allow(dead_code)]

pub mod socket_guard;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ingester_core::config::EngineSettings;
use ingester_core::download::RetryPolicy;
use ingester_core::emitter::MemoryEmitter;
use ingester_core::ingest::Ingestor;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Settings with short timeouts so failure paths finish quickly.
pub fn fast_settings(concurrency: usize) -> EngineSettings {
    EngineSettings {
        concurrency,
        connection_timeout: Duration::from_secs(5),
        stall_timeout: Duration::from_secs(5),
        max_attempts: 3,
    }
}

/// A retry policy with near-zero backoff.
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(1),
        Duration::from_millis(5),
        2.0,
    )
}

/// Opens an ingestor whose cache lives under `dir/cache`.
pub async fn open_ingestor(
    dir: &Path,
    settings: EngineSettings,
) -> (Ingestor, Arc<MemoryEmitter>) {
    let emitter = Arc::new(MemoryEmitter::new(dir.join("cache")));
    let ingestor = Ingestor::open_with_policy(
        &settings,
        emitter.clone(),
        fast_policy(settings.max_attempts),
    )
    .await
    .expect("open ingestor");
    (ingestor, emitter)
}

/// Lists staged files left in the cache's temp area.
pub fn leftover_partials(dir: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir.join("cache").join(".tmp"))
        .map(|entries| entries.filter_map(Result::ok).map(|e| e.path()).collect())
        .unwrap_or_default()
}

/// How a [`RawServer`] treats each connection.
#[derive(Debug, Clone, Copy)]
pub enum Misbehavior {
    /// Reads the request and never answers.
    Silent,
    /// Sends headers announcing `declared` bytes, then `sent` bytes, then stops.
    StallAfter { declared: usize, sent: usize },
}

/// A bare TCP server counting the connections it accepted.
pub struct RawServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    task: tokio::task::JoinHandle<()>,
}

impl RawServer {
    pub async fn start(behavior: Misbehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);

        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle(stream, behavior));
            }
        });

        Self {
            addr,
            connections,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for RawServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle(mut stream: TcpStream, behavior: Misbehavior) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    if let Misbehavior::StallAfter { declared, sent } = behavior {
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {declared}\r\n\r\n"
        );
        if stream.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        let _ = stream.write_all(&vec![b'x'; sent]).await;
        let _ = stream.flush().await;
    }

    // Hold the connection open until the client gives up.
    let _ = stream.read(&mut buf).await;
}
