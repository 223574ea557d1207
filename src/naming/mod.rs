//! Local filename resolution for fetched and buffered content.
//!
//! Precedence: explicit name/extension, then the URL's last path segment,
//! then the content's magic bytes and the `Content-Type` header. Names that
//! contain characters unsafe on common filesystems get those characters
//! replaced by `-` plus a short hash suffix so that distinct originals never
//! collapse onto the same file.

mod sniff;

use std::path::Path;

use url::Url;

use crate::digest::short_digest;

pub use sniff::{extension_from_content_type, extension_from_magic};

/// Length of the disambiguating hash appended to rewritten names.
const SUFFIX_LEN: usize = 8;
/// Longest stem kept, in bytes, leaving room for suffix and extension.
const MAX_STEM_BYTES: usize = 200;
/// Longest extension accepted from a URL, dot included.
const MAX_EXT_LEN: usize = 12;
/// Longest explicit extension kept, in bytes, dot included.
const MAX_EXPLICIT_EXT_BYTES: usize = 32;

/// Inputs available when naming one resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameHints<'a> {
    pub url: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub content_disposition: Option<&'a str>,
    pub explicit_name: Option<&'a str>,
    pub explicit_ext: Option<&'a str>,
    /// Leading bytes of the content, for magic-byte sniffing.
    pub head: &'a [u8],
    /// Stem used when nothing else yields one; also the hash source for
    /// buffers, which have no URL.
    pub fallback: &'a str,
}

/// A resolved name. `ext` is empty or starts with a dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub name: String,
    pub ext: String,
}

impl ResolvedName {
    /// The full filename, `name` followed by `ext`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, self.ext)
    }
}

/// Derives a safe local name for a resource.
#[must_use]
pub fn resolve_name(hints: &NameHints<'_>) -> ResolvedName {
    let (url_stem, url_ext) = hints.url.map(split_url_segment).unwrap_or_default();
    let (disposition_stem, disposition_ext) = hints
        .content_disposition
        .and_then(parse_content_disposition)
        .map(|name| split_file_name(&name))
        .unwrap_or_default();

    let stem = hints
        .explicit_name
        .map(str::to_string)
        .filter(|name| is_usable_stem(name))
        .or_else(|| url_stem.filter(|name| is_usable_stem(name)))
        .or_else(|| disposition_stem.filter(|name| is_usable_stem(name)))
        .unwrap_or_else(|| hints.fallback.to_string());

    let ext = hints
        .explicit_ext
        .and_then(normalize_ext)
        .or(url_ext)
        .or(disposition_ext)
        .or_else(|| extension_from_magic(hints.head).map(str::to_string))
        .or_else(|| {
            hints
                .content_type
                .and_then(extension_from_content_type)
                .map(str::to_string)
        })
        .unwrap_or_default();

    let hash_source = hints.url.unwrap_or(hints.fallback);
    ResolvedName {
        name: safe_stem(&stem, hash_source),
        ext: ext.replace(is_unsafe_char, "-"),
    }
}

/// Whether `c` cannot appear in a cached filename.
fn is_unsafe_char(c: char) -> bool {
    matches!(c, ':' | '/' | '*' | '?' | '"' | '<' | '>' | '|' | '\\') || c.is_control()
}

/// Replaces unsafe characters with `-` and appends a hash of `hash_source`
/// when any replacement happened.
fn safe_stem(stem: &str, hash_source: &str) -> String {
    let mut stem = truncate_to_boundary(stem, MAX_STEM_BYTES).to_string();
    if !stem.contains(is_unsafe_char) {
        return stem;
    }
    stem = stem.replace(is_unsafe_char, "-");
    format!("{stem}-{}", short_digest(hash_source.as_bytes(), SUFFIX_LEN))
}

fn truncate_to_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Rejects stems that would escape or alias the entry directory.
fn is_usable_stem(stem: &str) -> bool {
    !stem.trim().is_empty() && stem != "." && stem != ".."
}

/// Splits the percent-decoded last path segment of `url` into stem and extension.
fn split_url_segment(url: &str) -> (Option<String>, Option<String>) {
    let Ok(parsed) = Url::parse(url) else {
        return (None, None);
    };
    let Some(segment) = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
    else {
        return (None, None);
    };
    let decoded = urlencoding::decode(segment)
        .map_or_else(|_| segment.to_string(), std::borrow::Cow::into_owned);
    let (stem, ext) = split_file_name(&decoded);
    (stem, ext)
}

fn split_file_name(file_name: &str) -> (Option<String>, Option<String>) {
    // Path::extension would treat `a:b/c.jpg` as a path; split on the last dot only.
    match file_name.rfind('.') {
        Some(0) | None => (Some(file_name.to_string()), None),
        Some(dot) => {
            let ext = &file_name[dot..];
            if ext.len() > MAX_EXT_LEN || ext.len() <= 1 || ext.contains(is_unsafe_char) {
                (Some(file_name.to_string()), None)
            } else {
                (Some(file_name[..dot].to_string()), Some(ext.to_string()))
            }
        }
    }
}

fn normalize_ext(ext: &str) -> Option<String> {
    let ext = ext.trim();
    if ext.is_empty() {
        return None;
    }
    let ext = if ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{ext}")
    };
    Some(truncate_to_boundary(&ext, MAX_EXPLICIT_EXT_BYTES).to_string())
}

/// Parses a `Content-Disposition` header value for its filename.
///
/// Handles `filename="x.pdf"`, `filename=x.pdf` and the RFC 5987
/// `filename*=UTF-8''x.pdf` form, preferring the latter.
#[must_use]
pub fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + 10..].trim();
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            if let Ok(decoded) = urlencoding::decode(encoded[..end].trim()) {
                return base_name(&decoded);
            }
        }
    }

    let pos = header.find("filename=")?;
    let value = header[pos + 9..].trim();
    if let Some(stripped) = value.strip_prefix('"') {
        let end = stripped.find('"')?;
        return base_name(&stripped[..end]);
    }
    let end = value.find(';').unwrap_or(value.len());
    base_name(value[..end].trim())
}

/// Keeps only the final component of a server-supplied name.
fn base_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name);
    Path::new(last)
        .file_name()
        .map(|file_name| file_name.to_string_lossy().into_owned())
        .filter(|file_name| !file_name.is_empty())
}
