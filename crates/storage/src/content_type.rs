//! Content type detection for generated files.
//!
//! The extension wins; otherwise the first 512 bytes are sniffed.

/// Bytes examined when sniffing.
pub const SNIFF_LEN: usize = 512;

const OCTET_STREAM: &str = "application/octet-stream";

/// Guess a content type from the file path, falling back to the content.
pub fn detect(path: &str, data: &[u8]) -> String {
    match mime_guess::from_path(path).first() {
        Some(mime) => with_charset(mime.essence_str()),
        None => sniff(data).to_string(),
    }
}

fn with_charset(essence: &str) -> String {
    let textual = essence.starts_with("text/")
        || matches!(
            essence,
            "application/javascript" | "application/json" | "application/xml" | "image/svg+xml"
        );
    if textual {
        format!("{essence}; charset=utf-8")
    } else {
        essence.to_string()
    }
}

/// Signature-based sniffing over the first [`SNIFF_LEN`] bytes.
pub fn sniff(data: &[u8]) -> &'static str {
    let head = &data[..data.len().min(SNIFF_LEN)];

    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"%PDF-", "application/pdf"),
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"\x1f\x8b\x08", "application/x-gzip"),
        (b"PK\x03\x04", "application/zip"),
        (b"wOFF", "font/woff"),
        (b"wOF2", "font/woff2"),
    ];
    for (magic, mime) in SIGNATURES {
        if head.starts_with(magic) {
            return mime;
        }
    }
    if head.len() >= 12 && &head[..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        return "image/webp";
    }

    let trimmed = trim_leading_whitespace(head);
    for marker in ["<!doctype html", "<html", "<head", "<body", "<script", "<p", "<!--"] {
        if starts_with_ignore_case(trimmed, marker.as_bytes()) {
            return "text/html; charset=utf-8";
        }
    }
    if trimmed.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }

    if looks_like_text(head) {
        "text/plain; charset=utf-8"
    } else {
        OCTET_STREAM
    }
}

fn trim_leading_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !matches!(*b, b'\t' | b'\n' | b'\x0c' | b'\r' | b' '))
        .unwrap_or(data.len());
    &data[start..]
}

fn starts_with_ignore_case(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len() && data[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn looks_like_text(data: &[u8]) -> bool {
    let binary_control = |b: &u8| matches!(*b, 0x00..=0x08 | 0x0b | 0x0e..=0x1a | 0x1c..=0x1f);
    if data.iter().any(binary_control) {
        return false;
    }
    // A truncated multi-byte sequence at the cut-off is still text.
    match std::str::from_utf8(data) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    }
}
