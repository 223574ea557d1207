//! Extension detection from leading content bytes and `Content-Type`.

/// Guesses an extension (with leading dot) from the magic bytes at the start of `head`.
#[must_use]
pub fn extension_from_magic(head: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (&[0xFF, 0xD8, 0xFF], ".jpg"),
        (&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A], ".png"),
        (b"GIF87a", ".gif"),
        (b"GIF89a", ".gif"),
        (b"%PDF-", ".pdf"),
        (&[b'P', b'K', 0x03, 0x04], ".zip"),
        (&[0x1F, 0x8B], ".gz"),
        (&[b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C], ".7z"),
        (&[0x00, 0x00, 0x01, 0x00], ".ico"),
        (&[b'I', b'I', 0x2A, 0x00], ".tif"),
        (&[b'M', b'M', 0x00, 0x2A], ".tif"),
        (b"8BPS", ".psd"),
        (b"ID3", ".mp3"),
        (b"OggS", ".ogg"),
        (b"fLaC", ".flac"),
        (&[0x1A, 0x45, 0xDF, 0xA3], ".webm"),
        (b"wOFF", ".woff"),
        (b"wOF2", ".woff2"),
        (&[0x00, b'a', b's', b'm'], ".wasm"),
    ];

    if let Some((_, ext)) = SIGNATURES.iter().find(|(magic, _)| head.starts_with(magic)) {
        return Some(ext);
    }

    if head.len() >= 12 && head.starts_with(b"RIFF") {
        match &head[8..12] {
            b"WEBP" => return Some(".webp"),
            b"WAVE" => return Some(".wav"),
            b"AVI " => return Some(".avi"),
            _ => {}
        }
    }

    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        return Some(match &head[8..12] {
            b"avif" | b"avis" => ".avif",
            b"heic" | b"heix" | b"mif1" => ".heic",
            b"qt  " => ".mov",
            b"M4A " => ".m4a",
            _ => ".mp4",
        });
    }

    if looks_like_svg(head) {
        return Some(".svg");
    }

    None
}

fn looks_like_svg(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head);
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("<svg") {
        return true;
    }
    trimmed.starts_with("<?xml") && trimmed.contains("<svg")
}

/// Guess file extension from Content-Type header.
#[must_use]
pub fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    let ext = match mime.as_str() {
        "text/html" => ".html",
        "text/plain" => ".txt",
        "text/markdown" => ".md",
        "text/csv" => ".csv",
        "application/json" => ".json",
        "application/xml" | "text/xml" => ".xml",
        "application/pdf" => ".pdf",
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/avif" => ".avif",
        "image/svg+xml" => ".svg",
        "application/zip" => ".zip",
        "application/gzip" => ".gz",
        "text/css" => ".css",
        "text/javascript" | "application/javascript" => ".js",
        "video/mp4" => ".mp4",
        "video/webm" => ".webm",
        "audio/mpeg" => ".mp3",
        _ => return None,
    };
    Some(ext)
}
