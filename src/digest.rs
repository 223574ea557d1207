//! MD5 content digests shared by cache keys, fingerprints and name suffixes.

use std::path::Path;

use tokio::io::AsyncReadExt;

/// Read buffer size used when streaming files through the digest.
const READ_CHUNK: usize = 64 * 1024;

/// Hex MD5 digest of a byte slice.
#[must_use]
pub fn content_digest(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// First `len` hex characters of the digest of `data`.
#[must_use]
pub fn short_digest(data: &[u8], len: usize) -> String {
    let mut digest = content_digest(data);
    digest.truncate(len);
    digest
}

/// Incremental digest for content that arrives in chunks.
pub struct StreamingDigest {
    context: md5::Context,
}

impl Default for StreamingDigest {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingDigest {
    #[must_use]
    pub fn new() -> Self {
        Self {
            context: md5::Context::new(),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.context.consume(chunk);
    }

    /// Consumes the digest and returns the hex string.
    #[must_use]
    pub fn finish(self) -> String {
        format!("{:x}", self.context.compute())
    }
}

/// Streams a file through the digest without loading it whole.
///
/// # Errors
///
/// Returns the IO error from opening or reading the file.
pub async fn file_digest(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut digest = StreamingDigest::new();
    let mut buffer = vec![0u8; READ_CHUNK];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        digest.update(&buffer[..read]);
    }
    Ok(digest.finish())
}
