//! Cache keys derived from URLs or content.

use std::fmt;

use url::Url;

use super::CacheError;
use crate::digest::content_digest;

/// What a [`CacheKey`] was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Url,
    Content,
}

impl KeyKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Content => "content",
        }
    }
}

/// Identifier of one cached resource.
///
/// URL keys hash the normalized URL; content keys are the content's own
/// digest, so identical buffers always share one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: KeyKind,
    digest: String,
}

impl CacheKey {
    /// Derives the key for a remote URL.
    ///
    /// Normalization parses the URL (lowercasing scheme and host, dropping
    /// default ports, resolving dot segments) and strips the fragment, which
    /// is never sent to the server.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidUrl`] if `url` does not parse.
    pub fn for_url(url: &str) -> Result<Self, CacheError> {
        let mut parsed = Url::parse(url.trim()).map_err(|_| CacheError::InvalidUrl {
            url: url.to_string(),
        })?;
        parsed.set_fragment(None);
        Ok(Self {
            kind: KeyKind::Url,
            digest: content_digest(format!("url:{parsed}").as_bytes()),
        })
    }

    /// Derives the key for an in-memory buffer.
    #[must_use]
    pub fn for_content(content: &[u8]) -> Self {
        Self::from_content_hash(content_digest(content))
    }

    /// Builds a content key from an already computed content digest.
    #[must_use]
    pub fn from_content_hash(hash: impl Into<String>) -> Self {
        Self {
            kind: KeyKind::Content,
            digest: hash.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// The hex digest. URL and content digests share one space; the entry
    /// directory nests it under [`KeyKind::as_str`].
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.digest)
    }
}
