//! MIME detection from a content prefix.
//!
//! Detection looks at the first [`SNIFF_LEN`] bytes only. The file extension
//! is consulted solely when the bytes are inconclusive.

use std::io::{self, Cursor, Read};

/// Number of leading bytes inspected.
pub const SNIFF_LEN: usize = 3 * 1024;

pub const OCTET_STREAM: &str = "application/octet-stream";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Leading-byte signatures. `None` in a pattern matches any byte.
#[rustfmt::skip]
const SIGNATURES: &[(&[Option<u8>], &str)] = &[
    (&lit(b"%PDF-"), "application/pdf"),
    (&lit(b"\x89PNG\r\n\x1a\n"), "image/png"),
    (&lit(b"\xff\xd8\xff"), "image/jpeg"),
    (&lit(b"GIF87a"), "image/gif"),
    (&lit(b"GIF89a"), "image/gif"),
    (
        &[
            Some(b'R'), Some(b'I'), Some(b'F'), Some(b'F'),
            None, None, None, None,
            Some(b'W'), Some(b'E'), Some(b'B'), Some(b'P'),
        ],
        "image/webp",
    ),
    (
        &[
            Some(b'R'), Some(b'I'), Some(b'F'), Some(b'F'),
            None, None, None, None,
            Some(b'W'), Some(b'A'), Some(b'V'), Some(b'E'),
        ],
        "audio/wav",
    ),
    (
        &[
            Some(b'R'), Some(b'I'), Some(b'F'), Some(b'F'),
            None, None, None, None,
            Some(b'A'), Some(b'V'), Some(b'I'), Some(b' '),
        ],
        "video/avi",
    ),
    (&lit(b"BM"), "image/bmp"),
    (&lit(b"\x00\x00\x01\x00"), "image/x-icon"),
    (&lit(b"PK\x03\x04"), "application/zip"),
    (&lit(b"\x1f\x8b\x08"), "application/x-gzip"),
    (&lit(b"Rar!\x1a\x07"), "application/x-rar-compressed"),
    (&lit(b"7z\xbc\xaf\x27\x1c"), "application/x-7z-compressed"),
    (&lit(b"\x00asm"), "application/wasm"),
    (&lit(b"ID3"), "audio/mpeg"),
    (&lit(b"OggS\x00"), "application/ogg"),
    (&lit(b"fLaC"), "audio/flac"),
    (&lit(b"\x1a\x45\xdf\xa3"), "video/webm"),
    (
        &[
            None, None, None, None,
            Some(b'f'), Some(b't'), Some(b'y'), Some(b'p'),
        ],
        "video/mp4",
    ),
];

/// Expands a byte literal into an exact-match pattern.
const fn lit<const N: usize>(bytes: &[u8; N]) -> [Option<u8>; N] {
    let mut out = [None; N];
    let mut i = 0;
    while i < N {
        out[i] = Some(bytes[i]);
        i += 1;
    }
    out
}

fn signature_matches(prefix: &[u8], pattern: &[Option<u8>]) -> bool {
    prefix.len() >= pattern.len()
        && pattern
            .iter()
            .zip(prefix)
            .all(|(want, got)| want.is_none_or(|w| w == *got))
}

/// Detects a MIME type from content bytes alone.
///
/// Returns [`OCTET_STREAM`] when nothing matches, including for an empty
/// prefix.
pub fn sniff_bytes(prefix: &[u8]) -> &'static str {
    let prefix = &prefix[..prefix.len().min(SNIFF_LEN)];
    if prefix.is_empty() {
        return OCTET_STREAM;
    }

    if let Some((_, mime)) = SIGNATURES
        .iter()
        .find(|(sig, _)| signature_matches(prefix, sig))
    {
        return *mime;
    }

    // POSIX tar keeps its magic at offset 257.
    if prefix.len() >= 262 && &prefix[257..262] == b"ustar" {
        return "application/x-tar";
    }

    if let Some(mime) = sniff_markup(prefix) {
        return mime;
    }

    if looks_like_text(prefix) {
        return TEXT_PLAIN;
    }

    OCTET_STREAM
}

fn sniff_markup(prefix: &[u8]) -> Option<&'static str> {
    let start = prefix
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(prefix.len());
    let head: Vec<u8> = prefix[start..]
        .iter()
        .take(16)
        .map(u8::to_ascii_lowercase)
        .collect();

    if head.starts_with(b"<?xml") {
        Some("text/xml; charset=utf-8")
    } else if head.starts_with(b"<!doctype html")
        || head.starts_with(b"<html")
        || head.starts_with(b"<head")
        || head.starts_with(b"<body")
    {
        Some("text/html; charset=utf-8")
    } else if head.starts_with(b"%!ps-adobe-") {
        Some("application/postscript")
    } else {
        None
    }
}

/// No NUL and no C0 control bytes other than whitespace. A multi-byte UTF-8
/// sequence cut at the end of the prefix is tolerated.
fn looks_like_text(prefix: &[u8]) -> bool {
    let binary = prefix
        .iter()
        .any(|&b| b == 0 || (b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c)));
    if binary {
        return false;
    }
    match std::str::from_utf8(prefix) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none() && prefix.len() - e.valid_up_to() < 4,
    }
}

/// Returns the lower-cased extension of `name`, or an empty string.
pub fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// MIME type registered for a file extension.
pub fn mime_from_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext.to_ascii_lowercase().as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "7z" => "application/x-7z-compressed",
        "rar" => "application/vnd.rar",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "wasm" => "application/wasm",
        _ => return None,
    };
    Some(mime)
}

/// Content type for an upload: sniffed bytes first, extension only when
/// the bytes say `application/octet-stream`.
pub fn detect_mime(prefix: &[u8], name: &str) -> String {
    let sniffed = sniff_bytes(prefix);
    if sniffed == OCTET_STREAM
        && let Some(mime) = mime_from_extension(&extension_of(name))
    {
        return mime.to_string();
    }
    sniffed.to_string()
}

/// Sniffs a sequential reader without consuming it.
///
/// Reads up to [`SNIFF_LEN`] bytes and returns the detected type together
/// with a reader that yields the full, unchanged stream.
pub fn sniff_reader<R: Read>(
    mut reader: R,
    name: &str,
) -> io::Result<(String, impl Read)> {
    let mut prefix = Vec::with_capacity(SNIFF_LEN);
    (&mut reader)
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut prefix)?;
    let mime = detect_mime(&prefix, name);
    Ok((mime, Cursor::new(prefix).chain(reader)))
}
