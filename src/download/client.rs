//! HTTP client wrapper performing one fetch attempt at a time.
//!
//! [`HttpClient::fetch_once`] streams a response body into a staging file,
//! enforcing the connection timeout on the response headers and the stall
//! timeout between body chunks. The MD5 digest and the first bytes of the
//! body (for magic-byte sniffing) are collected while streaming, so the
//! staged file never has to be read back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderName, HeaderValue, RETRY_AFTER};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};
use url::Url;

use super::DownloadError;
use super::constants::SNIFF_LEN;
use crate::digest::StreamingDigest;
use crate::user_agent;

/// Basic-auth credentials scoped to a single resource.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// One remote resource to fetch, with its passthrough credentials and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub auth: Option<BasicAuth>,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth: None,
            headers: Vec::new(),
        }
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
}

/// Per-attempt timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum wait for response headers.
    pub connection: Duration,
    /// Maximum gap between body chunks.
    pub stall: Duration,
}

/// A body fully written to its staging path.
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub temp_path: PathBuf,
    pub size_bytes: u64,
    pub content_hash: String,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    /// Up to the first 512 bytes of the body.
    pub head: Vec<u8>,
}

/// HTTP client for streaming fetches.
///
/// Create once and share; the underlying connection pool is reused across
/// attempts and resources.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client identifying itself with the crate's User-Agent.
    ///
    /// No overall request timeout is set: transfers may take arbitrarily
    /// long as long as they keep making progress.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, DownloadError> {
        let client = Client::builder()
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .map_err(DownloadError::ClientBuild)?;
        Ok(Self { client })
    }

    /// Wraps an already configured reqwest client.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Performs a single attempt, writing the body to `temp_path`.
    ///
    /// On any error the partial file is removed before returning.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::InvalidUrl`] / [`DownloadError::InvalidHeader`] for a malformed request
    /// - [`DownloadError::ConnectionTimeout`] if headers do not arrive in time
    /// - [`DownloadError::HttpStatus`] for non-2xx responses
    /// - [`DownloadError::StallTimeout`] if the body stops making progress
    /// - [`DownloadError::Network`] / [`DownloadError::Io`] for transport or disk failures
    #[instrument(skip(self, request, temp_path, timeouts), fields(url = %request.url))]
    pub async fn fetch_once(
        &self,
        request: &FetchRequest,
        temp_path: &Path,
        timeouts: Timeouts,
    ) -> Result<FetchedFile, DownloadError> {
        let url = parse_http_url(&request.url)?;
        let mut builder = self.client.get(url);
        for (name, value) in &request.headers {
            let invalid = || DownloadError::InvalidHeader {
                url: request.url.clone(),
                name: name.clone(),
            };
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            builder = builder.header(header_name, header_value);
        }
        if let Some(auth) = &request.auth {
            builder = builder.basic_auth(&auth.username, auth.password.as_deref());
        }

        let response = match tokio::time::timeout(timeouts.connection, builder.send()).await {
            Err(_) => {
                return Err(DownloadError::connection_timeout(
                    &request.url,
                    timeouts.connection,
                ));
            }
            Ok(Err(e)) if e.is_timeout() => {
                return Err(DownloadError::connection_timeout(
                    &request.url,
                    timeouts.connection,
                ));
            }
            Ok(Err(e)) => return Err(DownloadError::network(&request.url, e)),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if !status.is_success() {
            let retry_after = header_string(&response, &RETRY_AFTER);
            return Err(DownloadError::http_status_with_retry_after(
                &request.url,
                status.as_u16(),
                retry_after,
            ));
        }

        let content_type = header_string(&response, &CONTENT_TYPE);
        let content_disposition = header_string(&response, &CONTENT_DISPOSITION);

        let partial = PartialFile::new(temp_path);
        let file = File::create(temp_path)
            .await
            .map_err(|e| DownloadError::io(temp_path, e))?;
        let body = stream_to_file(file, response, &request.url, temp_path, timeouts.stall).await?;
        partial.keep();

        debug!(
            bytes = body.size_bytes,
            content_type = content_type.as_deref().unwrap_or(""),
            "attempt complete"
        );

        Ok(FetchedFile {
            temp_path: temp_path.to_path_buf(),
            size_bytes: body.size_bytes,
            content_hash: body.content_hash,
            content_type,
            content_disposition,
            head: body.head,
        })
    }
}

fn parse_http_url(raw: &str) -> Result<Url, DownloadError> {
    let url = Url::parse(raw).map_err(|_| DownloadError::invalid_url(raw))?;
    if matches!(url.scheme(), "http" | "https") {
        Ok(url)
    } else {
        Err(DownloadError::invalid_url(raw))
    }
}

fn header_string(response: &reqwest::Response, name: &HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

struct StreamedBody {
    size_bytes: u64,
    content_hash: String,
    head: Vec<u8>,
}

/// Streams response body to file, bounding the wait for every chunk.
async fn stream_to_file(
    file: File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
    stall_timeout: Duration,
) -> Result<StreamedBody, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut digest = StreamingDigest::new();
    let mut head = Vec::with_capacity(SNIFF_LEN);
    let mut size_bytes: u64 = 0;

    loop {
        let Ok(next) = tokio::time::timeout(stall_timeout, stream.next()).await else {
            return Err(DownloadError::stall_timeout(url, stall_timeout, size_bytes));
        };
        let Some(chunk_result) = next else {
            break;
        };
        let chunk = chunk_result.map_err(|e| DownloadError::network(url, e))?;

        if head.len() < SNIFF_LEN {
            let take = (SNIFF_LEN - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
        }
        digest.update(&chunk);
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;
        size_bytes += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path, e))?;

    Ok(StreamedBody {
        size_bytes,
        content_hash: digest.finish(),
        head,
    })
}

/// Removes a staging file on drop unless [`PartialFile::keep`] was called.
///
/// Covers error returns and cancellation of the owning future alike.
struct PartialFile {
    path: Option<PathBuf>,
}

impl PartialFile {
    fn new(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
        }
    }

    fn keep(mut self) {
        self.path = None;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed partial file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove partial file"),
            }
        }
    }
}
